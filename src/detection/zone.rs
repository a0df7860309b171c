//! 区域判定 (Zone containment)
//!
//! 多边形与关键点共用归一化坐标 [0,1]×[0,1].
//! 每种区域类型选定需要检查的关键点子集 (包含规则).
//!
//! 注意: 每个关键点独立判断是否落在该类型的 *任意* 多边形内,
//! 不要求所有关键点落在同一个多边形里.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::types::{
    KeypointSet, LEFT_HIP, LEFT_KNEE, LEFT_SHOULDER, NOSE, NUM_KEYPOINTS, RIGHT_HIP, RIGHT_KNEE,
    RIGHT_SHOULDER,
};

/// 起床后判定赖床的时间窗
const OVERSLEEP_WINDOW_MINUTES: i64 = 180;

/// 区域类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Safe,
    Bed,
    Floor,
    Chair,
    Couch,
    Bench,
}

impl ZoneType {
    pub const ALL: [ZoneType; 6] = [
        ZoneType::Safe,
        ZoneType::Bed,
        ZoneType::Floor,
        ZoneType::Chair,
        ZoneType::Couch,
        ZoneType::Bench,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ZoneType::Safe => "safe",
            ZoneType::Bed => "bed",
            ZoneType::Floor => "floor",
            ZoneType::Chair => "chair",
            ZoneType::Couch => "couch",
            ZoneType::Bench => "bench",
        }
    }

    pub fn default_rule(self) -> ContainmentRule {
        match self {
            ZoneType::Safe | ZoneType::Chair | ZoneType::Bench => ContainmentRule::Hip,
            ZoneType::Bed | ZoneType::Couch => ContainmentRule::Torso,
            ZoneType::Floor => ContainmentRule::TorsoHead,
        }
    }

    /// 需要记录停留时长的区域
    pub fn tracks_dwell(self) -> bool {
        matches!(self, ZoneType::Bed | ZoneType::Couch)
    }
}

/// 包含规则: 决定检查哪些关键点
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainmentRule {
    Hip,
    Torso,
    TorsoHead,
    TorsoHeadKnees,
    FullBody,
}

const HIP_POINTS: [usize; 2] = [LEFT_HIP, RIGHT_HIP];
const TORSO_POINTS: [usize; 4] = [LEFT_SHOULDER, RIGHT_SHOULDER, LEFT_HIP, RIGHT_HIP];
const TORSO_HEAD_POINTS: [usize; 5] = [LEFT_SHOULDER, RIGHT_SHOULDER, LEFT_HIP, RIGHT_HIP, NOSE];
const TORSO_HEAD_KNEE_POINTS: [usize; 7] = [
    LEFT_SHOULDER,
    RIGHT_SHOULDER,
    LEFT_HIP,
    RIGHT_HIP,
    NOSE,
    LEFT_KNEE,
    RIGHT_KNEE,
];
const FULL_BODY_POINTS: [usize; NUM_KEYPOINTS] =
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

impl ContainmentRule {
    pub fn keypoints(self) -> &'static [usize] {
        match self {
            ContainmentRule::Hip => &HIP_POINTS,
            ContainmentRule::Torso => &TORSO_POINTS,
            ContainmentRule::TorsoHead => &TORSO_HEAD_POINTS,
            ContainmentRule::TorsoHeadKnees => &TORSO_HEAD_KNEE_POINTS,
            ContainmentRule::FullBody => &FULL_BODY_POINTS,
        }
    }
}

/// 多边形 (顶点有序)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    vertices: Vec<[f32; 2]>,
}

impl Polygon {
    /// 少于3个顶点返回 `None`
    pub fn new(vertices: Vec<[f32; 2]>) -> Option<Self> {
        if vertices.len() < 3 {
            return None;
        }
        Some(Self { vertices })
    }

    pub fn vertices(&self) -> &[[f32; 2]] {
        &self.vertices
    }

    pub fn is_degenerate(&self) -> bool {
        self.vertices.len() < 3
    }

    /// 射线法 (奇偶规则) 判断点是否在多边形内
    ///
    /// 水平边不与水平射线相交, 直接跳过; 每条边按半开区间 [ymin, ymax) 计数,
    /// 相邻两条边共享的顶点只会被计一次.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.vertices[i];
            let [xj, yj] = self.vertices[j];
            j = i;

            if yi == yj {
                continue;
            }
            if (yi > y) != (yj > y) {
                let x_cross = xi + (y - yi) * (xj - xi) / (yj - yi);
                if x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

/// 一种类型的区域 (可包含多个多边形)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_type: ZoneType,
    pub rule: ContainmentRule,
    pub polygons: Vec<Polygon>,
}

impl Zone {
    pub fn new(zone_type: ZoneType) -> Self {
        Self {
            zone_type,
            rule: zone_type.default_rule(),
            polygons: Vec::new(),
        }
    }

    /// 判断身体是否在区域内
    ///
    /// - 多边形列表为空: 永远不在内
    /// - 过滤后没有有效关键点: 视为在内 (放行)
    /// - 否则每个有效关键点需落在某个多边形内 (各点可落在不同多边形)
    pub fn contains(&self, keypoints: &KeypointSet) -> bool {
        if self.polygons.is_empty() {
            return false;
        }

        self.rule
            .keypoints()
            .iter()
            .map(|&i| keypoints.get(i))
            .filter(|kp| kp.is_valid())
            .all(|kp| self.polygons.iter().any(|poly| poly.contains(kp.x, kp.y)))
    }
}

/// 全部区域配置快照 (帧处理线程独占)
#[derive(Clone, Debug)]
pub struct ZoneSet {
    zones: HashMap<ZoneType, Zone>,
}

impl Default for ZoneSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneSet {
    pub fn new() -> Self {
        let zones = ZoneType::ALL.iter().map(|&t| (t, Zone::new(t))).collect();
        Self { zones }
    }

    /// 替换某类区域的多边形, 返回丢弃的退化多边形数量
    pub fn replace(&mut self, zone_type: ZoneType, polygons: Vec<Polygon>) -> usize {
        let before = polygons.len();
        let polygons: Vec<Polygon> = polygons.into_iter().filter(|p| !p.is_degenerate()).collect();
        let dropped = before - polygons.len();
        self.zones
            .entry(zone_type)
            .or_insert_with(|| Zone::new(zone_type))
            .polygons = polygons;
        dropped
    }

    pub fn set_rule(&mut self, zone_type: ZoneType, rule: ContainmentRule) {
        self.zones
            .entry(zone_type)
            .or_insert_with(|| Zone::new(zone_type))
            .rule = rule;
    }

    pub fn zone(&self, zone_type: ZoneType) -> Option<&Zone> {
        self.zones.get(&zone_type)
    }

    pub fn contains(&self, zone_type: ZoneType, keypoints: &KeypointSet) -> bool {
        self.zones
            .get(&zone_type)
            .map(|z| z.contains(keypoints))
            .unwrap_or(false)
    }

    /// 身体所在的全部区域类型 (按 `ZoneType::ALL` 顺序)
    pub fn contained_types(&self, keypoints: &KeypointSet) -> Vec<ZoneType> {
        ZoneType::ALL
            .iter()
            .copied()
            .filter(|&t| self.contains(t, keypoints))
            .collect()
    }
}

/// 区域停留计时 (床/沙发)
#[derive(Clone, Debug, Default)]
pub struct DwellTracker {
    entries: HashMap<ZoneType, NaiveDateTime>,
}

impl DwellTracker {
    /// 更新停留状态, 在区域内时返回已停留时长
    pub fn update(
        &mut self,
        zone_type: ZoneType,
        contained: bool,
        now: NaiveDateTime,
    ) -> Option<Duration> {
        if !contained {
            self.entries.remove(&zone_type);
            return None;
        }
        let entry = *self.entries.entry(zone_type).or_insert(now);
        Some(now - entry)
    }

    pub fn duration(&self, zone_type: ZoneType, now: NaiveDateTime) -> Option<Duration> {
        self.entries.get(&zone_type).map(|entry| now - *entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// 沙发作息判定结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CouchVerdict {
    Safe,
    Oversleeping,
    SleepTooLong,
}

/// 沙发日/夜作息策略
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CouchPolicy {
    pub bedtime: NaiveTime,
    pub wake_time: NaiveTime,
    pub max_nap: Duration,
}

impl CouchPolicy {
    pub fn new(bedtime: NaiveTime, wake_time: NaiveTime, max_nap: Duration) -> Self {
        Self {
            bedtime,
            wake_time,
            max_nap,
        }
    }

    /// 夜间窗口 [bedtime, wake), 可跨午夜
    pub fn in_night_window(&self, now: NaiveTime) -> bool {
        if self.bedtime <= self.wake_time {
            now >= self.bedtime && now < self.wake_time
        } else {
            now >= self.bedtime || now < self.wake_time
        }
    }

    /// 起床后的分钟数 (跨午夜取模)
    fn minutes_since_wake(&self, now: NaiveTime) -> i64 {
        let mut delta = now.signed_duration_since(self.wake_time).num_minutes();
        if delta < 0 {
            delta += 24 * 60;
        }
        delta
    }

    /// `dwell` 为 `None` 表示当前不在沙发上
    pub fn evaluate(&self, now: NaiveTime, dwell: Option<Duration>) -> CouchVerdict {
        let Some(dwell) = dwell else {
            return CouchVerdict::Safe;
        };
        if self.in_night_window(now) {
            return CouchVerdict::Safe;
        }
        if self.minutes_since_wake(now) < OVERSLEEP_WINDOW_MINUTES {
            return CouchVerdict::Oversleeping;
        }
        if dwell > self.max_nap {
            return CouchVerdict::SleepTooLong;
        }
        CouchVerdict::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::Keypoint;

    fn unit_square() -> Polygon {
        Polygon::new(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]).unwrap()
    }

    fn body_with(points: &[(usize, f32, f32)]) -> KeypointSet {
        let mut kps = [Keypoint::missing(); NUM_KEYPOINTS];
        for &(i, x, y) in points {
            kps[i] = Keypoint::new(x, y, 0.9);
        }
        KeypointSet::new(kps)
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_point_in_square() {
        let sq = unit_square();
        assert!(sq.contains(0.5, 0.5));
        assert!(!sq.contains(1.5, 0.5));
        assert!(!sq.contains(0.5, -0.2));
    }

    #[test]
    fn test_ray_through_shared_vertex_counts_once() {
        // 菱形: 水平射线 y=0.5 正好穿过左右两个顶点
        let diamond =
            Polygon::new(vec![[0.5, 0.0], [1.0, 0.5], [0.5, 1.0], [0.0, 0.5]]).unwrap();
        assert!(diamond.contains(0.5, 0.5));
        assert!(!diamond.contains(-0.1, 0.5));
        assert!(!diamond.contains(1.1, 0.5));
    }

    #[test]
    fn test_horizontal_edges_in_concave_polygon() {
        // U 形: 射线沿着水平边所在高度
        let u = Polygon::new(vec![
            [0.0, 0.0],
            [0.3, 0.0],
            [0.3, 0.6],
            [0.6, 0.6],
            [0.6, 0.0],
            [0.9, 0.0],
            [0.9, 1.0],
            [0.0, 1.0],
        ])
        .unwrap();
        assert!(u.contains(0.1, 0.3));
        assert!(!u.contains(0.45, 0.3));
        assert!(u.contains(0.75, 0.3));
        assert!(u.contains(0.45, 0.8));
    }

    #[test]
    fn test_degenerate_polygon_rejected() {
        assert!(Polygon::new(vec![[0.0, 0.0], [1.0, 1.0]]).is_none());
    }

    #[test]
    fn test_hip_rule_square() {
        let mut zone = Zone::new(ZoneType::Safe);
        zone.rule = ContainmentRule::Hip;
        zone.polygons.push(unit_square());

        let inside = body_with(&[(LEFT_HIP, 0.5, 0.5), (RIGHT_HIP, 0.5, 0.5)]);
        assert!(zone.contains(&inside));

        let outside = body_with(&[(LEFT_HIP, 1.5, 0.5), (RIGHT_HIP, 0.5, 0.5)]);
        assert!(!zone.contains(&outside));
    }

    #[test]
    fn test_keypoints_may_span_different_polygons() {
        let left = Polygon::new(vec![[0.0, 0.0], [0.5, 0.0], [0.5, 1.0], [0.0, 1.0]]).unwrap();
        let right = Polygon::new(vec![[0.5, 0.0], [1.0, 0.0], [1.0, 1.0], [0.5, 1.0]]).unwrap();
        let mut zone = Zone::new(ZoneType::Bed);
        zone.rule = ContainmentRule::Hip;
        zone.polygons = vec![left, right];

        // 左髋在左边多边形, 右髋在右边多边形
        let body = body_with(&[(LEFT_HIP, 0.25, 0.5), (RIGHT_HIP, 0.75, 0.5)]);
        assert!(zone.contains(&body));
    }

    #[test]
    fn test_empty_polygons_never_contain() {
        let zone = Zone::new(ZoneType::Floor);
        let body = body_with(&[(LEFT_HIP, 0.5, 0.5), (RIGHT_HIP, 0.5, 0.5)]);
        assert!(!zone.contains(&body));
        // 即使没有有效关键点
        assert!(!zone.contains(&body_with(&[])));
    }

    #[test]
    fn test_no_valid_keypoints_passes_through() {
        let mut zone = Zone::new(ZoneType::Safe);
        zone.polygons.push(unit_square());
        assert!(zone.contains(&body_with(&[])));
    }

    #[test]
    fn test_invalid_keypoints_are_ignored() {
        let mut zone = Zone::new(ZoneType::Safe);
        zone.rule = ContainmentRule::Hip;
        zone.polygons.push(unit_square());
        let mut kps = *body_with(&[(LEFT_HIP, 0.5, 0.5)]).points();
        // 低置信度且在外面的右髋被忽略
        kps[RIGHT_HIP] = Keypoint::new(1.5, 0.5, 0.05);
        assert!(zone.contains(&KeypointSet::new(kps)));
    }

    #[test]
    fn test_zone_set_replace_drops_degenerate() {
        let mut zones = ZoneSet::new();
        let dropped = zones.replace(
            ZoneType::Bed,
            vec![unit_square(), Polygon { vertices: vec![[0.0, 0.0]] }],
        );
        assert_eq!(dropped, 1);
        assert_eq!(zones.zone(ZoneType::Bed).unwrap().polygons.len(), 1);

        let body = body_with(&[
            (LEFT_SHOULDER, 0.4, 0.3),
            (RIGHT_SHOULDER, 0.6, 0.3),
            (LEFT_HIP, 0.4, 0.6),
            (RIGHT_HIP, 0.6, 0.6),
        ]);
        assert_eq!(zones.contained_types(&body), vec![ZoneType::Bed]);
    }

    #[test]
    fn test_dwell_tracker_enter_and_exit() {
        let mut dwell = DwellTracker::default();
        let t0 = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert_eq!(dwell.update(ZoneType::Bed, true, t0), Some(Duration::zero()));
        let t1 = t0 + Duration::minutes(20);
        assert_eq!(dwell.update(ZoneType::Bed, true, t1), Some(Duration::minutes(20)));
        assert_eq!(dwell.update(ZoneType::Bed, false, t1), None);
        assert_eq!(dwell.duration(ZoneType::Bed, t1), None);
        let t2 = t1 + Duration::minutes(5);
        assert_eq!(dwell.update(ZoneType::Bed, true, t2), Some(Duration::zero()));
    }

    #[test]
    fn test_couch_oversleeping_after_wake() {
        let policy = CouchPolicy::new(t(22, 0), t(6, 0), Duration::minutes(30));
        assert_eq!(
            policy.evaluate(t(7, 30), Some(Duration::minutes(5))),
            CouchVerdict::Oversleeping
        );
    }

    #[test]
    fn test_couch_nap_too_long() {
        let policy = CouchPolicy::new(t(22, 0), t(6, 0), Duration::minutes(30));
        assert_eq!(
            policy.evaluate(t(14, 0), Some(Duration::minutes(45))),
            CouchVerdict::SleepTooLong
        );
        assert_eq!(
            policy.evaluate(t(14, 0), Some(Duration::minutes(20))),
            CouchVerdict::Safe
        );
    }

    #[test]
    fn test_couch_night_window_is_safe() {
        let policy = CouchPolicy::new(t(22, 0), t(6, 0), Duration::minutes(30));
        assert_eq!(policy.evaluate(t(23, 0), Some(Duration::hours(6))), CouchVerdict::Safe);
        assert_eq!(policy.evaluate(t(3, 0), Some(Duration::hours(6))), CouchVerdict::Safe);
        assert_eq!(policy.evaluate(t(14, 0), None), CouchVerdict::Safe);
    }

    #[test]
    fn test_couch_night_window_without_wrap() {
        let policy = CouchPolicy::new(t(1, 0), t(9, 0), Duration::minutes(30));
        assert!(policy.in_night_window(t(2, 0)));
        assert!(!policy.in_night_window(t(23, 0)));
        assert_eq!(
            policy.evaluate(t(10, 0), Some(Duration::minutes(1))),
            CouchVerdict::Oversleeping
        );
    }
}
