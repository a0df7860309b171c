//! 跟踪目标状态存储
//! Per-track state store
//!
//! 以跟踪器分配的ID为键, 每个目标持有自己的定长历史缓冲与跌倒/区域状态.
//! 只允许帧处理线程访问, 因此内部不加锁.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use super::fall::FallState;
use super::pose::PoseFeatures;
use super::safety::SafetyVerdict;
use super::types::{BBox, FrameInput, KeypointSet, TrackObservation};
use super::zone::DwellTracker;
use crate::utils::RingBuffer;

/// 默认历史窗口容量
pub const DEFAULT_HISTORY: usize = 5;

/// 单个跟踪目标
#[derive(Clone, Debug)]
pub struct TrackedPerson {
    /// 唯一跟踪ID
    pub id: u32,

    /// 检测框历史
    pub bboxes: RingBuffer<BBox>,

    /// 关键点历史 (姿态平滑窗口)
    pub keypoints: RingBuffer<KeypointSet>,

    /// 最近一次有效的姿态特征
    pub pose: Option<PoseFeatures>,

    /// 跌倒计数器
    pub fall: FallState,

    /// 床/沙发停留计时
    pub dwell: DwellTracker,

    /// 最近一次的安全结论
    pub last_verdict: Option<SafetyVerdict>,

    /// 连续缺失帧数
    pub frames_missed: u32,

    /// 总共被观测的帧数
    pub total_frames: u32,
}

impl TrackedPerson {
    fn new(id: u32, capacity: usize) -> Self {
        Self {
            id,
            bboxes: RingBuffer::new(capacity),
            keypoints: RingBuffer::new(capacity),
            pose: None,
            fall: FallState::default(),
            dwell: DwellTracker::default(),
            last_verdict: None,
            frames_missed: 0,
            total_frames: 0,
        }
    }

    /// 记录一帧观测. 关键点无法解析时清空姿态窗口
    fn record(&mut self, obs: &TrackObservation) {
        self.bboxes.push(obs.bbox.clone());
        match KeypointSet::from_flat(&obs.keypoints) {
            Some(kps) => self.keypoints.push(kps),
            None => self.keypoints.clear(),
        }
        self.frames_missed = 0;
        self.total_frames += 1;
    }

    pub fn latest_bbox(&self) -> Option<&BBox> {
        self.bboxes.latest()
    }

    pub fn latest_keypoints(&self) -> Option<&KeypointSet> {
        self.keypoints.latest()
    }
}

/// 单帧入库结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ingest {
    /// 本帧有新观测的ID (按输入顺序, 已去重)
    pub seen: Vec<u32>,
    /// 本帧缺失但仍保留的ID
    pub missed: Vec<u32>,
    /// 本帧被清除的ID (跟踪器丢失或缺失过久)
    pub purged: Vec<u32>,
}

pub struct TrackStateStore {
    tracks: HashMap<u32, TrackedPerson>,
    capacity: usize,
    max_missed_frames: u32,
}

impl TrackStateStore {
    pub fn new(capacity: usize, max_missed_frames: u32) -> Self {
        Self {
            tracks: HashMap::new(),
            capacity: capacity.max(2),
            max_missed_frames,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 入库一帧: 先清除跟踪器报告丢失的ID, 再记录观测, 最后处理缺失目标
    pub fn ingest(&mut self, frame: &FrameInput) -> Ingest {
        let mut result = Ingest::default();

        for id in &frame.lost_ids {
            if self.tracks.remove(id).is_some() {
                result.purged.push(*id);
            }
        }

        let mut seen = HashSet::new();
        for obs in &frame.objects {
            if !seen.insert(obs.track_id) {
                continue;
            }
            let capacity = self.capacity;
            let track = match self.tracks.entry(obs.track_id) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(TrackedPerson::new(obs.track_id, capacity)),
            };
            track.record(obs);
            result.seen.push(obs.track_id);
        }

        let max_missed = self.max_missed_frames;
        let mut expired = Vec::new();
        for (id, track) in self.tracks.iter_mut() {
            if seen.contains(id) {
                continue;
            }
            track.frames_missed += 1;
            if track.frames_missed > max_missed {
                expired.push(*id);
            } else {
                result.missed.push(*id);
            }
        }
        for id in expired {
            self.tracks.remove(&id);
            result.purged.push(id);
        }
        result.missed.sort_unstable();

        result
    }

    pub fn get(&self, id: u32) -> Option<&TrackedPerson> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut TrackedPerson> {
        self.tracks.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<TrackedPerson> {
        self.tracks.remove(&id)
    }

    /// 清除所有跟踪状态
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedPerson> {
        self.tracks.values()
    }
}
