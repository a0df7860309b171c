//! 帧处理器 (Frame Processor)
//! 职责: 入库跟踪结果 → 姿态分类 → 跌倒检测 (命中即短路) → 区域安全判定 → 生成事件
//!
//! 只在帧处理线程中使用, 独占跟踪状态与区域快照. 同步线程的结果通过队列在帧间应用.

use std::time::Instant;

use chrono::{DateTime, TimeZone};
use crossbeam_channel::Receiver;

use super::fall::FallDetector;
use super::pose::PoseClassifier;
use super::safety::{ReasonCode, SafetyEngine, SafetyVerdict};
use super::tracker::TrackStateStore;
use super::types::FrameInput;
use super::zone::ZoneSet;
use crate::config::{SafetyFlags, SentinelConfig};
use crate::log_sink::Logger;
use crate::telemetry::{StateSnapshot, SyncUpdate, TelemetryCounters, TrackEvent};

const TAG: &str = "frame";

/// 每多少帧打印一次统计
const STATS_EVERY: u64 = 300;

pub struct FrameProcessor {
    device_id: String,
    store: TrackStateStore,
    classifier: PoseClassifier,
    fall: FallDetector,
    safety: SafetyEngine,
    zones: ZoneSet,
    flags: SafetyFlags,
    log: Logger,

    // 统计
    frame_count: u64,
    count: u64,
    last: Instant,
    current_fps: f64,
}

impl FrameProcessor {
    pub fn new(config: &SentinelConfig, log: Logger) -> Self {
        Self {
            device_id: config.device_id.clone(),
            store: TrackStateStore::new(config.history_capacity, config.max_missed_frames),
            classifier: PoseClassifier::new(),
            fall: FallDetector::new(config.fps, config.fall_velocity_threshold),
            safety: SafetyEngine::new(config.flags.policy()),
            zones: ZoneSet::new(),
            flags: config.flags.clone(),
            log,
            frame_count: 0,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }

    // ========== 同步结果 ==========

    /// 应用一条同步结果
    pub fn apply_update(&mut self, update: SyncUpdate) {
        match update {
            SyncUpdate::Flags(flags) => {
                if flags == self.flags {
                    return;
                }
                self.log.info(
                    TAG,
                    format!(
                        "🎛️ 安全参数已更新: 算法 {:?} | 区域判定 {} | 午睡上限 {}分钟",
                        flags.fall_algorithm, flags.safety_check_enabled, flags.max_nap_minutes
                    ),
                );
                self.safety.set_policy(flags.policy());
                self.flags = flags;
            }
            SyncUpdate::Zones(zone_type, polygons) => {
                let count = polygons.len();
                let dropped = self.zones.replace(zone_type, polygons);
                if dropped > 0 {
                    self.log.warn(
                        TAG,
                        format!("⚠️ 区域 {} 丢弃 {} 个无效多边形", zone_type.as_str(), dropped),
                    );
                }
                self.log.debug(
                    TAG,
                    format!("🗺️ 区域 {} 已更新: {} 个多边形", zone_type.as_str(), count - dropped),
                );
            }
        }
    }

    /// 取出队列中所有同步结果并应用 (不阻塞), 返回条数
    pub fn apply_sync_updates(&mut self, rx: &Receiver<SyncUpdate>) -> usize {
        let mut applied = 0;
        for update in rx.try_iter() {
            self.apply_update(update);
            applied += 1;
        }
        applied
    }

    // ========== 帧处理 ==========

    /// 处理一帧跟踪结果
    ///
    /// 每个有观测的目标产生一个事件; 本帧缺失但仍保留的目标产生一个间断事件,
    /// 沿用算法A的上一次判定.
    pub fn process<Tz: TimeZone>(&mut self, frame: &FrameInput, now: &DateTime<Tz>) -> Vec<TrackEvent> {
        let local = now.naive_local();
        let timestamp = now.timestamp_millis();
        let algorithm = self.flags.fall_algorithm;
        let safety_enabled = self.flags.safety_check_enabled;

        let ingest = self.store.ingest(frame);
        for id in &ingest.purged {
            self.log.debug(TAG, format!("🗑️ 目标 {} 已清除", id));
        }

        let mut events = Vec::with_capacity(ingest.seen.len() + ingest.missed.len());
        for &id in &ingest.seen {
            let Some(track) = self.store.get_mut(id) else {
                continue;
            };

            // 停留计时每帧刷新, 不受跌倒和姿态无效影响; 须在分类之前 (分类会清空不完整的窗口)
            let observed = match track.keypoints.latest() {
                Some(kps) => Some(SafetyEngine::observe(kps, &self.zones, &mut track.dwell, local)),
                None => None,
            };

            let pose = self.classifier.classify(&mut track.keypoints);
            track.pose = pose;
            let fall = self.fall.update(&mut track.fall, &track.bboxes, pose.as_ref());
            let fall_asserted = fall.asserted(algorithm);

            let (verdict, zones) = if fall_asserted {
                (Some(SafetyVerdict::fall()), Vec::new())
            } else {
                match (pose.as_ref(), observed) {
                    (Some(_), Some(_)) if !safety_enabled => {
                        (Some(SafetyVerdict::safe(ReasonCode::Tracking)), Vec::new())
                    }
                    (Some(p), Some(obs)) => {
                        let verdict = self.safety.judge(p.label, &obs, local);
                        (Some(verdict), obs.contained)
                    }
                    // 姿态无效: 本帧跳过判定
                    _ => (None, Vec::new()),
                }
            };

            if let Some(v) = verdict {
                if !v.safe && track.last_verdict != Some(v) {
                    self.log.warn(TAG, format!("🚨 目标 {} 不安全: {}", id, v.reason.as_str()));
                }
                track.last_verdict = Some(v);
            }

            events.push(TrackEvent {
                track_id: id,
                bbox: track.latest_bbox().cloned().unwrap_or_default(),
                pose_label: pose.map(|p| p.label),
                pose_code: pose.map(|p| p.pose_code),
                fall,
                fall_asserted,
                verdict,
                zones,
                timestamp,
            });
        }

        // 本帧缺失的目标: 计数器衰减, 上报间断状态
        for &id in &ingest.missed {
            let Some(track) = self.store.get_mut(id) else {
                continue;
            };
            let fall = self.fall.gap(&mut track.fall);
            let fall_asserted = fall.asserted(algorithm);
            let verdict = fall_asserted.then(SafetyVerdict::fall);
            if verdict.is_some() {
                track.last_verdict = verdict;
            }

            events.push(TrackEvent {
                track_id: id,
                bbox: track.latest_bbox().cloned().unwrap_or_default(),
                pose_label: None,
                pose_code: None,
                fall,
                fall_asserted,
                verdict,
                zones: Vec::new(),
                timestamp,
            });
        }

        self.update_stats();
        events
    }

    fn update_stats(&mut self) {
        self.frame_count += 1;
        self.count += 1;
        let now = Instant::now();
        if now.duration_since(self.last).as_secs() >= 1 {
            self.current_fps = self.count as f64 / now.duration_since(self.last).as_secs_f64();
            self.count = 0;
            self.last = now;
        }

        if self.frame_count % STATS_EVERY == 0 {
            self.log.info(
                TAG,
                format!(
                    "🎯 帧处理: {}人 | {:.1}fps | 不安全 {}人",
                    self.store.len(),
                    self.current_fps,
                    self.unsafe_tracks().len()
                ),
            );
        }
    }

    /// 最近一次结论为不安全的目标 (升序)
    pub fn unsafe_tracks(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .store
            .iter()
            .filter(|t| t.last_verdict.is_some_and(|v| !v.safe))
            .map(|t| t.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// 生成状态快照
    pub fn snapshot(&self, log_dropped: u64, telemetry: TelemetryCounters) -> StateSnapshot {
        StateSnapshot {
            device_id: self.device_id.clone(),
            frame_count: self.frame_count,
            active_tracks: self.store.len(),
            unsafe_tracks: self.unsafe_tracks(),
            processing_fps: self.current_fps,
            log_dropped,
            telemetry,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 清除所有跟踪状态 (区域与参数保留)
    pub fn reset(&mut self) {
        self.store.reset();
        self.log.info(TAG, "🔄 跟踪状态已重置");
    }

    pub fn store(&self) -> &TrackStateStore {
        &self.store
    }

    pub fn zones(&self) -> &ZoneSet {
        &self.zones
    }

    pub fn flags(&self) -> &SafetyFlags {
        &self.flags
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
