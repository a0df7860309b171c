//! 姿态分类器 (Pose Classifier)
//!
//! 对关键点滑动窗口做简单移动平均, 计算躯干/大腿角度与肢体长度比例,
//! 再按固定的布尔判定表输出四类姿态标签.
//!
//! 必需关键点: 双肩、双髋、双膝、双脚踝. 最新一帧缺任何一个时清空窗口并返回 `None`,
//! 调用方必须跳过本帧判定, 不得用默认标签代替.

use serde::{Deserialize, Serialize};

use super::types::{
    KeypointSet, LEFT_ANKLE, LEFT_HIP, LEFT_KNEE, LEFT_SHOULDER, NUM_KEYPOINTS, RIGHT_ANKLE,
    RIGHT_HIP, RIGHT_KNEE, RIGHT_SHOULDER,
};
use crate::utils::RingBuffer;

/// 默认平滑窗口大小
pub const DEFAULT_WINDOW: usize = 5;

/// 分类所需的8个关键点
pub const REQUIRED_KEYPOINTS: [usize; 8] = [
    LEFT_SHOULDER,
    RIGHT_SHOULDER,
    LEFT_HIP,
    RIGHT_HIP,
    LEFT_KNEE,
    RIGHT_KNEE,
    LEFT_ANKLE,
    RIGHT_ANKLE,
];

// 判定阈值 (角度单位: 度)
const TORSO_TILTED_DEG: f32 = 30.0;
const THIGH_BENT_DEG: f32 = 40.0;
const TORSO_FLAT_DEG: f32 = 80.0;
const THIGH_CALF_SHORT: f32 = 0.7;
const TORSO_LEG_SHORT: f32 = 0.5;
const THIGH_FLAT_DEG: f32 = 60.0;

/// 姿态标签
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseLabel {
    Standing,
    Sitting,
    BendingDown,
    LyingDown,
}

impl PoseLabel {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => PoseLabel::Standing,
            1 => PoseLabel::Sitting,
            2 => PoseLabel::BendingDown,
            _ => PoseLabel::LyingDown,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            PoseLabel::Standing => 0,
            PoseLabel::Sitting => 1,
            PoseLabel::BendingDown => 2,
            PoseLabel::LyingDown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PoseLabel::Standing => "standing",
            PoseLabel::Sitting => "sitting",
            PoseLabel::BendingDown => "bending_down",
            PoseLabel::LyingDown => "lying_down",
        }
    }
}

/// 几何特征 + 分类结果
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PoseFeatures {
    pub torso_angle: f32,
    pub thigh_angle: f32,
    pub thigh_uprightness: f32,
    pub thigh_calf_ratio: f32,
    pub torso_leg_ratio: f32,
    pub label: PoseLabel,
    pub pose_code: u8,
}

/// 按判定表求姿态编码
///
/// a=躯干>30°, b=大腿偏离>40°, c=躯干>80°, d=大腿/小腿<0.7, e=躯干/腿<0.5, f=大腿偏离>60°
/// lsb = (a∧b∧d) ∨ (a∧¬b) ∨ (¬a∧c∧¬f)
/// msb = (a∧b∧¬d∧e) ∨ ¬a ∨ ¬c
pub fn pose_code(
    torso_angle: f32,
    thigh_uprightness: f32,
    thigh_calf_ratio: f32,
    torso_leg_ratio: f32,
) -> u8 {
    let a = torso_angle > TORSO_TILTED_DEG;
    let b = thigh_uprightness > THIGH_BENT_DEG;
    let c = torso_angle > TORSO_FLAT_DEG;
    let d = thigh_calf_ratio < THIGH_CALF_SHORT;
    let e = torso_leg_ratio < TORSO_LEG_SHORT;
    let f = thigh_uprightness > THIGH_FLAT_DEG;

    let lsb = (a && b && d) || (a && !b) || (!a && c && !f);
    let msb = (a && b && !d && e) || !a || !c;

    (msb as u8) * 2 + lsb as u8
}

/// 姿态分类器 (无状态, 窗口由每个跟踪目标自己持有)
#[derive(Clone, Debug, Default)]
pub struct PoseClassifier;

impl PoseClassifier {
    pub fn new() -> Self {
        Self
    }

    /// 对窗口做分类. 最新一帧缺必需关键点时清空窗口
    pub fn classify(&self, window: &mut RingBuffer<KeypointSet>) -> Option<PoseFeatures> {
        let complete = window
            .latest()
            .map(|kps| kps.has_all(&REQUIRED_KEYPOINTS))
            .unwrap_or(false);
        if !complete {
            window.clear();
            return None;
        }

        let avg = Self::moving_average(window);
        Self::features(&avg)
    }

    /// 逐关键点简单移动平均
    fn moving_average(window: &RingBuffer<KeypointSet>) -> [(f32, f32); NUM_KEYPOINTS] {
        let mut sum = [(0.0f32, 0.0f32); NUM_KEYPOINTS];
        let n = window.len().max(1) as f32;
        for frame in window.iter() {
            for (acc, kp) in sum.iter_mut().zip(frame.points().iter()) {
                acc.0 += kp.x;
                acc.1 += kp.y;
            }
        }
        for acc in sum.iter_mut() {
            acc.0 /= n;
            acc.1 /= n;
        }
        sum
    }

    fn features(p: &[(f32, f32); NUM_KEYPOINTS]) -> Option<PoseFeatures> {
        let shoulder_c = midpoint(p[LEFT_SHOULDER], p[RIGHT_SHOULDER]);
        let hip_c = midpoint(p[LEFT_HIP], p[RIGHT_HIP]);
        let knee_c = midpoint(p[LEFT_KNEE], p[RIGHT_KNEE]);

        let torso_vec = (shoulder_c.0 - hip_c.0, shoulder_c.1 - hip_c.1);
        let thigh_vec = (knee_c.0 - hip_c.0, knee_c.1 - hip_c.1);

        let torso_angle = angle_to_up(torso_vec)?;
        let thigh_angle = angle_to_up(thigh_vec)?;
        let thigh_uprightness = (thigh_angle - 180.0).abs();

        let thigh = mean_len(p, (LEFT_HIP, LEFT_KNEE), (RIGHT_HIP, RIGHT_KNEE));
        let calf = mean_len(p, (LEFT_KNEE, LEFT_ANKLE), (RIGHT_KNEE, RIGHT_ANKLE));
        let torso = mean_len(p, (LEFT_SHOULDER, LEFT_HIP), (RIGHT_SHOULDER, RIGHT_HIP));
        let leg = mean_len(p, (LEFT_HIP, LEFT_ANKLE), (RIGHT_HIP, RIGHT_ANKLE));

        let thigh_calf_ratio = if calf == 0.0 { 1.0 } else { thigh / calf };
        let torso_leg_ratio = if leg == 0.0 { 1.0 } else { torso / leg };

        let code = pose_code(torso_angle, thigh_uprightness, thigh_calf_ratio, torso_leg_ratio);

        Some(PoseFeatures {
            torso_angle,
            thigh_angle,
            thigh_uprightness,
            thigh_calf_ratio,
            torso_leg_ratio,
            label: PoseLabel::from_code(code),
            pose_code: code,
        })
    }
}

fn midpoint(a: (f32, f32), b: (f32, f32)) -> (f32, f32) {
    ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)
}

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

fn mean_len(p: &[(f32, f32)], left: (usize, usize), right: (usize, usize)) -> f32 {
    (dist(p[left.0], p[left.1]) + dist(p[right.0], p[right.1])) / 2.0
}

/// 与竖直向上 (0,-1) 的夹角 (度). 零长度向量返回 `None`
fn angle_to_up(v: (f32, f32)) -> Option<f32> {
    let norm = (v.0 * v.0 + v.1 * v.1).sqrt();
    if norm <= f32::EPSILON {
        return None;
    }
    let cos = (-v.1 / norm).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}
