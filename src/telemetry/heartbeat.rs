//! 心跳线程: 固定短间隔, 仅在设备已注册时发送, 失败直接忽略

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::backend::Backend;
use super::worker::{sleep_while_running, WorkerStats};
use crate::log_sink::Logger;

const TAG: &str = "heartbeat";

/// 连续失败多少次打印一次日志
const LOG_EVERY: u64 = 40;

pub struct HeartbeatPinger {
    backend: Arc<dyn Backend>,
    registered: Arc<AtomicBool>,
    interval: Duration,
    timeout: Duration,
    stats: Arc<WorkerStats>,
    failures_in_row: u64,
    log: Logger,
}

impl HeartbeatPinger {
    pub fn new(
        backend: Arc<dyn Backend>,
        registered: Arc<AtomicBool>,
        interval: Duration,
        timeout: Duration,
        stats: Arc<WorkerStats>,
        log: Logger,
    ) -> Self {
        Self {
            backend,
            registered,
            interval,
            timeout,
            stats,
            failures_in_row: 0,
            log,
        }
    }

    /// 发送一次心跳, 返回是否实际发送
    pub fn beat(&mut self) -> bool {
        if !self.registered.load(Ordering::Relaxed) {
            return false;
        }
        match self.backend.heartbeat(self.timeout) {
            Ok(()) => {
                self.failures_in_row = 0;
                self.stats.success();
            }
            Err(e) => {
                self.failures_in_row += 1;
                self.stats.failure();
                if self.failures_in_row % LOG_EVERY == 1 {
                    self.log.debug(TAG, format!("💔 心跳失败 (连续{}次): {}", self.failures_in_row, e));
                }
            }
        }
        true
    }

    pub fn run(mut self, running: Arc<AtomicBool>) {
        self.log.info(TAG, format!("💓 心跳线程启动 (间隔 {}ms)", self.interval.as_millis()));
        while running.load(Ordering::SeqCst) {
            self.beat();
            if !sleep_while_running(&running, self.interval) {
                break;
            }
        }
    }
}
