//! 运行上下文: 进程启动时构造一次, 显式传给需要的组件

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SentinelConfig;
use crate::log_sink::Logger;

#[derive(Clone)]
pub struct SentinelContext {
    pub config: SentinelConfig,
    pub log: Logger,
    /// 设备是否已在后端注册 (心跳只在注册后发送)
    registered: Arc<AtomicBool>,
}

impl SentinelContext {
    pub fn new(config: SentinelConfig, log: Logger) -> Self {
        Self {
            config,
            log,
            registered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registered_flag(&self) -> Arc<AtomicBool> {
        self.registered.clone()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Relaxed)
    }

    pub fn set_registered(&self, registered: bool) {
        if self.registered.swap(registered, Ordering::Relaxed) != registered {
            let msg = if registered { "✅ 设备已注册" } else { "⚠️ 设备注册已撤销" };
            self.log.info("context", msg);
        }
    }
}
