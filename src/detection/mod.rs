/// 检测系统 (Detection System)
///
/// 帧处理线程独占, 负责安全分析
/// - Pose:     姿态分类
/// - Fall:     跌倒检测
/// - Zone:     区域包含与停留策略
/// - Safety:   统一安全判定
/// - Tracker:  跟踪目标状态
pub mod detector;
pub mod fall;
pub mod pose;
pub mod safety;
pub mod tracker;
pub mod types;
pub mod zone;

pub use detector::FrameProcessor;
pub use fall::{FallAlgorithm, FallDetector, FallStatus};
pub use pose::{PoseClassifier, PoseFeatures, PoseLabel};
pub use safety::{ReasonCode, SafetyEngine, SafetyVerdict, ZoneObservation};
pub use tracker::TrackStateStore;
pub use types::{BBox, FrameInput, KeypointSet, TrackObservation};
pub use zone::{ContainmentRule, Polygon, ZoneSet, ZoneType};
