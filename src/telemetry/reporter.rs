//! 状态上报线程: 长间隔推送最近一次状态快照, 失败记录日志

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::backend::Backend;
use super::messages::StateSnapshot;
use super::worker::{sleep_while_running, WorkerStats};
use crate::log_sink::Logger;

const TAG: &str = "reporter";

/// 帧处理线程写入, 上报线程读取的快照 (弱一致, 仅作参考)
pub type SnapshotSlot = Arc<Mutex<Option<StateSnapshot>>>;

pub struct StateReporter {
    backend: Arc<dyn Backend>,
    slot: SnapshotSlot,
    interval: Duration,
    timeout: Duration,
    stats: Arc<WorkerStats>,
    log: Logger,
}

impl StateReporter {
    pub fn new(
        backend: Arc<dyn Backend>,
        slot: SnapshotSlot,
        interval: Duration,
        timeout: Duration,
        stats: Arc<WorkerStats>,
        log: Logger,
    ) -> Self {
        Self {
            backend,
            slot,
            interval,
            timeout,
            stats,
            log,
        }
    }

    /// 上报一次, 没有快照时跳过
    pub fn report(&self) -> bool {
        let snapshot = match self.slot.lock().clone() {
            Some(s) => s,
            None => return false,
        };
        match self.backend.report_state(&snapshot, self.timeout) {
            Ok(()) => {
                self.stats.success();
                self.log.debug(
                    TAG,
                    format!("📊 状态已上报: {}个目标, {:.1}fps", snapshot.active_tracks, snapshot.processing_fps),
                );
                true
            }
            Err(e) => {
                self.stats.failure();
                self.log.warn(TAG, format!("⚠️ 状态上报失败: {}", e));
                false
            }
        }
    }

    pub fn run(self, running: Arc<AtomicBool>) {
        self.log.info(TAG, format!("📊 状态上报线程启动 (间隔 {}s)", self.interval.as_secs()));
        while sleep_while_running(&running, self.interval) {
            self.report();
        }
    }
}
