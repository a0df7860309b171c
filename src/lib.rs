// 数字卫兵: 关键点流 → 跌倒/区域安全判定 → 遥测上报
pub mod config; // 本地配置与远程安全参数
pub mod context; // 运行上下文
pub mod detection; // 安全分析
pub mod log_sink; // 日志队列
pub mod telemetry; // 后台遥测线程
pub mod utils;

pub use crate::config::{SafetyFlags, SentinelConfig};
pub use crate::context::SentinelContext;
pub use crate::detection::FrameProcessor;
pub use crate::log_sink::{LogLevel, LogSink, Logger};
pub use crate::telemetry::TelemetryWorkerPool;
