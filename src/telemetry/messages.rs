//! 遥测消息定义
//! Messages handed from the frame thread to the telemetry workers

use std::sync::Arc;

use serde::Serialize;

use crate::config::SafetyFlags;
use crate::detection::fall::FallStatus;
use crate::detection::pose::PoseLabel;
use crate::detection::safety::SafetyVerdict;
use crate::detection::types::BBox;
use crate::detection::zone::{Polygon, ZoneType};

/// 已编码的图像 (帧或背景图)
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedImage {
    pub bytes: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    pub captured_at_ms: i64,
}

impl EncodedImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// 单个目标单帧的判定事件 (帧处理线程 → 事件投递)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackEvent {
    pub track_id: u32,
    pub bbox: BBox,
    pub pose_label: Option<PoseLabel>,
    pub pose_code: Option<u8>,
    pub fall: FallStatus,
    pub fall_asserted: bool,
    pub verdict: Option<SafetyVerdict>,
    pub zones: Vec<ZoneType>,
    pub timestamp: i64, // 毫秒
}

/// 同步线程拉取到的更新 (同步线程 → 帧处理线程)
#[derive(Clone, Debug, PartialEq)]
pub enum SyncUpdate {
    Flags(SafetyFlags),
    Zones(ZoneType, Vec<Polygon>),
}

/// 单个工作线程的计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounters {
    pub succeeded: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// 全部遥测线程的计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryCounters {
    pub uploads: WorkerCounters,
    pub sync: WorkerCounters,
    pub heartbeat: WorkerCounters,
    pub state_reports: WorkerCounters,
    pub events: WorkerCounters,
}

/// 周期上报的状态快照
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub device_id: String,
    pub frame_count: u64,
    pub active_tracks: usize,
    pub unsafe_tracks: Vec<u32>,
    pub processing_fps: f64,
    pub log_dropped: u64,
    pub telemetry: TelemetryCounters,
    pub timestamp: i64,
}
