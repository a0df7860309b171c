//! 跌倒检测器 (Fall Detector)
//!
//! 每个跟踪目标两个饱和计数器, 取值 [0, THRES]:
//! - 算法A: 仅看检测框运动 (顶边下移速度 / 高度收缩速度)
//! - 算法B: 检测框运动 + 严格躺姿, 两者同时满足时 +2
//!
//! 速度单位: 像素/毫秒, 时间跨度 = 窗口容量 / 帧率

use serde::{Deserialize, Serialize};

use super::pose::PoseFeatures;
use super::types::BBox;
use crate::utils::RingBuffer;

/// 计数器上限, 达到即判定跌倒
pub const FALL_THRES: u8 = 2;

/// 严格躺姿阈值
const STRICT_TORSO_DEG: f32 = 80.0;
const STRICT_THIGH_DEG: f32 = 60.0;

/// 跌倒算法选择 (远程配置 1 / 2)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FallAlgorithm {
    /// 仅检测框运动
    #[default]
    BboxMotion,
    /// 检测框运动 + 姿态
    MotionAndPose,
}

impl TryFrom<u8> for FallAlgorithm {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(FallAlgorithm::BboxMotion),
            2 => Ok(FallAlgorithm::MotionAndPose),
            other => Err(format!("unknown fall algorithm {other}, expected 1 or 2")),
        }
    }
}

impl From<FallAlgorithm> for u8 {
    fn from(a: FallAlgorithm) -> u8 {
        match a {
            FallAlgorithm::BboxMotion => 1,
            FallAlgorithm::MotionAndPose => 2,
        }
    }
}

/// 单个目标的跌倒状态 (由帧处理线程独占)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FallState {
    counter_a: u8,
    counter_b: u8,
    fall_a: bool,
    fall_b: bool,
}

impl FallState {
    pub fn status(&self) -> FallStatus {
        FallStatus {
            fall_a: self.fall_a,
            counter_a: self.counter_a,
            fall_b: self.fall_b,
            counter_b: self.counter_b,
        }
    }

    fn decay(&mut self) {
        self.counter_a = self.counter_a.saturating_sub(1);
        self.counter_b = self.counter_b.saturating_sub(1);
    }

    fn refresh_flags(&mut self) {
        self.fall_a = self.counter_a >= FALL_THRES;
        self.fall_b = self.counter_b >= FALL_THRES;
    }
}

/// 跌倒检测输出 (fallA, counterA, fallB, counterB)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FallStatus {
    pub fall_a: bool,
    pub counter_a: u8,
    pub fall_b: bool,
    pub counter_b: u8,
}

impl FallStatus {
    /// 按所选算法取跌倒结论
    pub fn asserted(&self, algorithm: FallAlgorithm) -> bool {
        match algorithm {
            FallAlgorithm::BboxMotion => self.fall_a,
            FallAlgorithm::MotionAndPose => self.fall_b,
        }
    }
}

/// 检测框运动速度 (像素/毫秒)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BboxVelocity {
    pub v_top: f32,
    pub v_height: f32,
}

pub struct FallDetector {
    fps: f32,
    velocity_threshold: f32,
}

impl FallDetector {
    pub fn new(fps: f32, velocity_threshold: f32) -> Self {
        Self {
            fps: fps.max(1.0),
            velocity_threshold,
        }
    }

    /// 窗口时间跨度 (毫秒)
    pub fn elapsed_ms(&self, window_capacity: usize) -> f32 {
        window_capacity as f32 / self.fps * 1000.0
    }

    /// 最旧样本 → 最新样本的运动速度; 样本不足2个返回 `None`
    pub fn velocity(&self, bboxes: &RingBuffer<BBox>) -> Option<BboxVelocity> {
        if bboxes.len() < 2 {
            return None;
        }
        let prev = bboxes.oldest()?;
        let cur = bboxes.latest()?;
        let elapsed = self.elapsed_ms(bboxes.capacity());
        Some(BboxVelocity {
            v_top: (cur.top() - prev.top()) / elapsed,
            v_height: (prev.height() - cur.height()) / elapsed,
        })
    }

    /// 有新检测框的一帧
    pub fn update(
        &self,
        state: &mut FallState,
        bboxes: &RingBuffer<BBox>,
        pose: Option<&PoseFeatures>,
    ) -> FallStatus {
        let Some(velocity) = self.velocity(bboxes) else {
            return state.status();
        };

        let Some(pose) = pose else {
            // 姿态无效: 两个计数器衰减
            state.decay();
            state.refresh_flags();
            return state.status();
        };

        let motion = velocity.v_top > self.velocity_threshold
            || velocity.v_height > self.velocity_threshold;
        let strict_pose =
            pose.torso_angle > STRICT_TORSO_DEG && pose.thigh_uprightness > STRICT_THIGH_DEG;

        // 算法A
        state.counter_a = if motion {
            (state.counter_a + 1).min(FALL_THRES)
        } else {
            state.counter_a.saturating_sub(1)
        };

        // 算法B
        state.counter_b = match (motion, strict_pose) {
            (true, true) => (state.counter_b + 2).min(FALL_THRES),
            (true, false) | (false, true) => (state.counter_b + 1).min(FALL_THRES),
            (false, false) => state.counter_b.saturating_sub(1),
        };

        state.refresh_flags();
        state.status()
    }

    /// 检测间断 (本帧无新检测框): 计数器衰减, 算法A沿用上一次的判定
    pub fn gap(&self, state: &mut FallState) -> FallStatus {
        state.decay();
        state.fall_b = state.counter_b >= FALL_THRES;
        state.status()
    }
}
