//! 区域安全判定 (Zone safety judgment)
//!
//! 严格优先级, 命中即返回:
//! 1. 已判定跌倒 → 调用方直接跳过本模块
//! 2. 躺姿 ∧ 在地面区域 → lying_on_floor
//! 3. 在床上超过停留阈值 → in_bed_too_long
//! 4. 躺姿 ∧ 在沙发上 → 按作息策略 oversleeping / sleep_too_long
//! 5. 躺姿 ∧ 不在任何安全区 → lying_outside_safe
//! 6. 其余安全: in_safe_area 或 tracking

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use super::pose::PoseLabel;
use super::types::KeypointSet;
use super::zone::{CouchPolicy, CouchVerdict, DwellTracker, ZoneSet, ZoneType};

/// 判定原因码
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    FallDetected,
    LyingOnFloor,
    InBedTooLong,
    Oversleeping,
    SleepTooLong,
    LyingOutsideSafe,
    InSafeArea,
    Tracking,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::FallDetected => "fall_detected",
            ReasonCode::LyingOnFloor => "lying_on_floor",
            ReasonCode::InBedTooLong => "in_bed_too_long",
            ReasonCode::Oversleeping => "oversleeping",
            ReasonCode::SleepTooLong => "sleep_too_long",
            ReasonCode::LyingOutsideSafe => "lying_outside_safe",
            ReasonCode::InSafeArea => "in_safe_area",
            ReasonCode::Tracking => "tracking",
        }
    }
}

/// 安全结论
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub reason: ReasonCode,
}

impl SafetyVerdict {
    pub fn safe(reason: ReasonCode) -> Self {
        Self { safe: true, reason }
    }

    pub fn unsafe_(reason: ReasonCode) -> Self {
        Self {
            safe: false,
            reason,
        }
    }

    pub fn fall() -> Self {
        Self::unsafe_(ReasonCode::FallDetected)
    }
}

/// 本帧区域观测: 所在区域 + 床/沙发已停留时长
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZoneObservation {
    pub contained: Vec<ZoneType>,
    pub bed_dwell: Option<Duration>,
    pub couch_dwell: Option<Duration>,
}

impl ZoneObservation {
    pub fn inside(&self, zone_type: ZoneType) -> bool {
        self.contained.contains(&zone_type)
    }
}

/// 判定参数 (由远程配置转换而来)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SafetyPolicy {
    pub bed_max_dwell: Duration,
    pub couch: CouchPolicy,
}

pub struct SafetyEngine {
    policy: SafetyPolicy,
}

impl SafetyEngine {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    pub fn set_policy(&mut self, policy: SafetyPolicy) {
        self.policy = policy;
    }

    /// 区域包含 + 停留计时刷新
    ///
    /// 每帧只要有关键点就要调用, 与姿态是否有效、是否跌倒无关,
    /// 否则离开床/沙发的那几帧不会清除进入时间.
    pub fn observe(
        keypoints: &KeypointSet,
        zones: &ZoneSet,
        dwell: &mut DwellTracker,
        now: NaiveDateTime,
    ) -> ZoneObservation {
        let contained = zones.contained_types(keypoints);
        let bed_dwell = dwell.update(ZoneType::Bed, contained.contains(&ZoneType::Bed), now);
        let couch_dwell = dwell.update(ZoneType::Couch, contained.contains(&ZoneType::Couch), now);
        ZoneObservation {
            contained,
            bed_dwell,
            couch_dwell,
        }
    }

    /// 统一安全判定 (跌倒已判定时不要调用)
    pub fn judge(&self, label: PoseLabel, zones: &ZoneObservation, now: NaiveDateTime) -> SafetyVerdict {
        let lying = label == PoseLabel::LyingDown;

        if lying && zones.inside(ZoneType::Floor) {
            SafetyVerdict::unsafe_(ReasonCode::LyingOnFloor)
        } else if zones.bed_dwell.is_some_and(|d| d > self.policy.bed_max_dwell) {
            SafetyVerdict::unsafe_(ReasonCode::InBedTooLong)
        } else if let Some(reason) = self.couch_reason(lying, zones.couch_dwell, now) {
            SafetyVerdict::unsafe_(reason)
        } else if lying && !zones.inside(ZoneType::Safe) {
            SafetyVerdict::unsafe_(ReasonCode::LyingOutsideSafe)
        } else if zones.inside(ZoneType::Safe) {
            SafetyVerdict::safe(ReasonCode::InSafeArea)
        } else {
            SafetyVerdict::safe(ReasonCode::Tracking)
        }
    }

    fn couch_reason(
        &self,
        lying: bool,
        couch_dwell: Option<Duration>,
        now: NaiveDateTime,
    ) -> Option<ReasonCode> {
        if !lying {
            return None;
        }
        match self.policy.couch.evaluate(now.time(), couch_dwell) {
            CouchVerdict::Safe => None,
            CouchVerdict::Oversleeping => Some(ReasonCode::Oversleeping),
            CouchVerdict::SleepTooLong => Some(ReasonCode::SleepTooLong),
        }
    }
}
