//! 配置/区域同步线程
//!
//! 参数表与每类区域各自一个定时器. 拉取结果经有界队列交给帧处理线程,
//! 本线程从不直接修改检测状态. 连续失败超过阈值后改用退避间隔.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};

use super::backend::{Backend, BackendError};
use super::messages::SyncUpdate;
use super::worker::{sleep_while_running, WorkerStats, SLEEP_SLICE};
use crate::config::{SafetyFlags, TelemetryConfig};
use crate::detection::zone::ZoneType;
use crate::log_sink::Logger;

const TAG: &str = "sync";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    pub flags_interval: Duration,
    pub zone_interval: Duration,
    pub backoff_interval: Duration,
    pub error_threshold: u32,
    pub timeout: Duration,
}

impl From<&TelemetryConfig> for SyncSettings {
    fn from(c: &TelemetryConfig) -> Self {
        Self {
            flags_interval: Duration::from_millis(c.flags_poll_ms),
            zone_interval: Duration::from_millis(c.zone_poll_ms),
            backoff_interval: Duration::from_millis(c.sync_backoff_poll_ms),
            error_threshold: c.sync_error_threshold,
            timeout: Duration::from_millis(c.sync_timeout_ms),
        }
    }
}

/// 同步项
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncItem {
    Flags,
    Zones(ZoneType),
}

struct Timer {
    item: SyncItem,
    interval: Duration,
    next_due: Instant,
}

pub struct SyncWorker {
    backend: Arc<dyn Backend>,
    tx: Sender<SyncUpdate>,
    settings: SyncSettings,
    timers: Vec<Timer>,
    consecutive_errors: u32,
    stats: Arc<WorkerStats>,
    log: Logger,
}

impl SyncWorker {
    pub fn new(
        backend: Arc<dyn Backend>,
        tx: Sender<SyncUpdate>,
        settings: SyncSettings,
        stats: Arc<WorkerStats>,
        log: Logger,
    ) -> Self {
        // 启动后立即拉取一次
        let now = Instant::now();
        let mut timers = vec![Timer {
            item: SyncItem::Flags,
            interval: settings.flags_interval,
            next_due: now,
        }];
        timers.extend(ZoneType::ALL.iter().map(|&t| Timer {
            item: SyncItem::Zones(t),
            interval: settings.zone_interval,
            next_due: now,
        }));

        Self {
            backend,
            tx,
            settings,
            timers,
            consecutive_errors: 0,
            stats,
            log,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// 是否处于退避状态
    pub fn backing_off(&self) -> bool {
        self.consecutive_errors > self.settings.error_threshold
    }

    /// 处理所有到期的同步项, 返回本轮拉取次数
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut pulled = 0;
        for i in 0..self.timers.len() {
            if self.timers[i].next_due > now {
                continue;
            }
            let item = self.timers[i].item;
            let ok = match self.pull(item) {
                Ok(update) => {
                    self.hand_off(update);
                    true
                }
                Err(e) => {
                    self.log.warn(TAG, format!("⚠️ 同步 {:?} 失败: {}", item, e));
                    false
                }
            };
            self.record(ok);
            pulled += 1;

            let interval = if self.backing_off() {
                self.settings.backoff_interval
            } else {
                self.timers[i].interval
            };
            self.timers[i].next_due = now + interval;
        }
        pulled
    }

    fn pull(&self, item: SyncItem) -> Result<SyncUpdate, BackendError> {
        match item {
            SyncItem::Flags => {
                let map = self.backend.fetch_flags(self.settings.timeout)?;
                let flags = SafetyFlags::from_map(&map).map_err(|e| BackendError::Decode(e.to_string()))?;
                Ok(SyncUpdate::Flags(flags))
            }
            SyncItem::Zones(t) => {
                let polygons = self.backend.fetch_zones(t, self.settings.timeout)?;
                Ok(SyncUpdate::Zones(t, polygons))
            }
        }
    }

    fn hand_off(&self, update: SyncUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.drop_one();
                self.log.debug(TAG, "同步队列已满, 丢弃本次结果");
            }
            Err(TrySendError::Disconnected(_)) => self.stats.drop_one(),
        }
    }

    fn record(&mut self, ok: bool) {
        if ok {
            if self.backing_off() {
                self.log.info(TAG, "✅ 同步恢复, 退出退避");
            }
            self.consecutive_errors = 0;
            self.stats.success();
        } else {
            self.consecutive_errors = self.consecutive_errors.saturating_add(1);
            self.stats.failure();
            if self.consecutive_errors == self.settings.error_threshold + 1 {
                self.log.warn(
                    TAG,
                    format!(
                        "⚠️ 连续失败 {} 次, 退避至 {}ms",
                        self.consecutive_errors,
                        self.settings.backoff_interval.as_millis()
                    ),
                );
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.timers.iter().map(|t| t.next_due).min()
    }

    pub fn run(mut self, running: Arc<AtomicBool>) {
        self.log.info(TAG, "🔄 同步线程启动");
        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            self.tick(now);
            let wait = self
                .next_due()
                .map(|due| due.saturating_duration_since(Instant::now()))
                .unwrap_or(SLEEP_SLICE);
            if !sleep_while_running(&running, wait.max(Duration::from_millis(1))) {
                break;
            }
        }
        self.log.info(TAG, "🛑 同步线程退出");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::fall::FallAlgorithm;
    use crate::detection::zone::Polygon;
    use crate::log_sink::{LogLevel, LogSink};
    use crate::telemetry::mock::MockBackend;
    use serde_json::json;

    fn settings() -> SyncSettings {
        SyncSettings {
            flags_interval: Duration::from_secs(5),
            zone_interval: Duration::from_secs(10),
            backoff_interval: Duration::from_secs(60),
            error_threshold: 2,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_first_tick_pulls_everything() {
        let mock = Arc::new(MockBackend::default());
        if let Some(obj) = json!({ "fall_algorithm": 2 }).as_object() {
            *mock.flags.lock() = obj.clone();
        }
        mock.zones.lock().insert(
            ZoneType::Bed,
            vec![Polygon::new(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]).unwrap()],
        );

        let (tx, rx) = crossbeam_channel::bounded(16);
        let sink = LogSink::new(64, LogLevel::Error, Vec::new());
        let mut worker = SyncWorker::new(mock, tx, settings(), Arc::new(WorkerStats::default()), sink.logger());

        let now = Instant::now();
        assert_eq!(worker.tick(now), 1 + ZoneType::ALL.len());
        // 尚未到期
        assert_eq!(worker.tick(now + Duration::from_secs(1)), 0);
        // 只有参数表到期
        assert_eq!(worker.tick(now + Duration::from_secs(6)), 1);

        let updates: Vec<SyncUpdate> = rx.try_iter().collect();
        assert_eq!(updates.len(), 2 + ZoneType::ALL.len());
        match &updates[0] {
            SyncUpdate::Flags(f) => assert_eq!(f.fall_algorithm, FallAlgorithm::MotionAndPose),
            other => panic!("unexpected {other:?}"),
        }
        assert!(updates
            .iter()
            .any(|u| matches!(u, SyncUpdate::Zones(ZoneType::Bed, p) if p.len() == 1)));
    }

    #[test]
    fn test_full_queue_drops_results() {
        let mock = Arc::new(MockBackend::default());
        let (tx, rx) = crossbeam_channel::bounded(2);
        let stats = Arc::new(WorkerStats::default());
        let sink = LogSink::new(64, LogLevel::Error, Vec::new());
        let mut worker = SyncWorker::new(mock, tx, settings(), stats.clone(), sink.logger());

        worker.tick(Instant::now());
        assert_eq!(rx.len(), 2);
        assert_eq!(stats.snapshot().dropped, (1 + ZoneType::ALL.len() - 2) as u64);
    }

    #[test]
    fn test_repeated_failures_back_off() {
        let mock = Arc::new(MockBackend::failing());
        let (tx, _rx) = crossbeam_channel::bounded(16);
        let sink = LogSink::new(64, LogLevel::Error, Vec::new());
        let settings = SyncSettings {
            error_threshold: 0,
            ..settings()
        };
        let mut worker = SyncWorker::new(mock.clone(), tx, settings, Arc::new(WorkerStats::default()), sink.logger());

        let start = Instant::now();
        worker.tick(start);
        assert!(worker.backing_off());

        // 正常间隔到期后不再拉取
        let before = mock.flag_calls.load(Ordering::SeqCst);
        worker.tick(start + Duration::from_secs(11));
        assert_eq!(mock.flag_calls.load(Ordering::SeqCst), before);

        // 退避间隔到期后恢复
        mock.fail.store(false, Ordering::SeqCst);
        worker.tick(start + Duration::from_secs(61));
        assert_eq!(worker.consecutive_errors(), 0);
        assert!(!worker.backing_off());
    }

    #[test]
    fn test_malformed_flags_count_as_failure() {
        let mock = Arc::new(MockBackend::default());
        if let Some(obj) = json!({ "bedtime": "soon" }).as_object() {
            *mock.flags.lock() = obj.clone();
        }
        let (tx, rx) = crossbeam_channel::bounded(16);
        let stats = Arc::new(WorkerStats::default());
        let sink = LogSink::new(64, LogLevel::Error, Vec::new());
        let mut worker = SyncWorker::new(mock, tx, settings(), stats.clone(), sink.logger());

        worker.tick(Instant::now());
        assert_eq!(stats.snapshot().failed, 1);
        assert!(rx.try_iter().all(|u| !matches!(u, SyncUpdate::Flags(_))));
    }
}
