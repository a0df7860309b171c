//! 检测系统数据结构定义
//! Data structures for the safety detection system

use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// COCO 关键点数量
pub const NUM_KEYPOINTS: usize = 17;

/// 不可见关键点的哨兵坐标 (x, y 均为该值)
pub const MISSING_COORD: f32 = -1.0;

/// 关键点置信度下限 (小于等于该值视为无效)
pub const MIN_KEYPOINT_CONF: f32 = 0.1;

// COCO 17关键点: 0-鼻子, 1/2-眼, 3/4-耳, 5/6-肩, 7/8-肘, 9/10-腕, 11/12-髋, 13/14-膝, 15/16-脚踝
pub const NOSE: usize = 0;
pub const LEFT_SHOULDER: usize = 5;
pub const RIGHT_SHOULDER: usize = 6;
pub const LEFT_HIP: usize = 11;
pub const RIGHT_HIP: usize = 12;
pub const LEFT_KNEE: usize = 13;
pub const RIGHT_KNEE: usize = 14;
pub const LEFT_ANKLE: usize = 15;
pub const RIGHT_ANKLE: usize = 16;

// ========== 数据结构 ==========

/// 检测框 (像素坐标, 左上角为原点)
///
/// 输出为角点形式; 输入接受上游的 `{x, y, w, h}` / `[x, y, w, h]`, 也接受角点形式
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BBoxInput")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    #[serde(default)]
    pub confidence: f32,
}

impl BBox {
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
            confidence: 1.0,
        }
    }

    pub fn top(&self) -> f32 {
        self.y1
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// 检测框的输入格式
#[derive(Deserialize)]
#[serde(untagged)]
enum BBoxInput {
    Xywh {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        #[serde(default = "full_confidence")]
        confidence: f32,
    },
    Corners {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        #[serde(default)]
        confidence: f32,
    },
    Tuple([f32; 4]),
}

fn full_confidence() -> f32 {
    1.0
}

impl From<BBoxInput> for BBox {
    fn from(input: BBoxInput) -> Self {
        match input {
            BBoxInput::Xywh { x, y, w, h, confidence } => BBox {
                confidence,
                ..BBox::from_xywh(x, y, w, h)
            },
            BBoxInput::Corners { x1, y1, x2, y2, confidence } => BBox {
                x1,
                y1,
                x2,
                y2,
                confidence,
            },
            BBoxInput::Tuple([x, y, w, h]) => BBox::from_xywh(x, y, w, h),
        }
    }
}

/// 单个关键点 (归一化坐标 [0,1] + 置信度)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    pub fn missing() -> Self {
        Self::new(MISSING_COORD, MISSING_COORD, 0.0)
    }

    /// 置信度 > 0.1 且坐标为正
    pub fn is_valid(&self) -> bool {
        self.confidence > MIN_KEYPOINT_CONF && self.x > 0.0 && self.y > 0.0
    }
}

/// 一帧的17个姿态关键点, 顺序固定
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeypointSet {
    points: [Keypoint; NUM_KEYPOINTS],
}

impl KeypointSet {
    pub fn new(points: [Keypoint; NUM_KEYPOINTS]) -> Self {
        Self { points }
    }

    /// 从上游检测器的扁平数组构建
    ///
    /// - 34个浮点: (x, y) 对, 哨兵对 `(-1, -1)` 表示不可见, 可见点置信度记为 1.0
    /// - 51个浮点: (x, y, confidence) 三元组
    ///
    /// 长度不符返回 `None`
    pub fn from_flat(values: &[f32]) -> Option<Self> {
        let mut points = [Keypoint::missing(); NUM_KEYPOINTS];
        match values.len() {
            34 => {
                for (i, pair) in values.chunks_exact(2).enumerate() {
                    let (x, y) = (pair[0], pair[1]);
                    if x == MISSING_COORD && y == MISSING_COORD {
                        continue;
                    }
                    points[i] = Keypoint::new(x, y, 1.0);
                }
            }
            51 => {
                for (i, triple) in values.chunks_exact(3).enumerate() {
                    points[i] = Keypoint::new(triple[0], triple[1], triple[2]);
                }
            }
            _ => return None,
        }
        Some(Self { points })
    }

    pub fn get(&self, idx: usize) -> &Keypoint {
        &self.points[idx]
    }

    pub fn points(&self) -> &[Keypoint; NUM_KEYPOINTS] {
        &self.points
    }

    /// 检查指定关键点是否全部有效
    pub fn has_all(&self, indices: &[usize]) -> bool {
        indices.iter().all(|&i| self.points[i].is_valid())
    }
}

/// 单个跟踪目标的观测 (上游跟踪器 → 帧处理线程)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackObservation {
    pub track_id: u32,
    pub bbox: BBox,
    /// 扁平关键点数组 (34 或 51 个浮点)
    #[serde(default)]
    pub keypoints: Vec<f32>,
}

/// 一帧的全部跟踪结果
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameInput {
    #[serde(default)]
    pub objects: Vec<TrackObservation>,
    /// 跟踪器判定丢失的ID
    #[serde(default)]
    pub lost_ids: Vec<u32>,
}
