//! 端到端: JSON Lines 跟踪结果 → FrameProcessor → 事件

use chrono::{DateTime, FixedOffset, TimeZone};
use serde_json::json;

use sentinel_guard::detection::{FrameInput, Polygon, ReasonCode, SafetyVerdict, ZoneType};
use sentinel_guard::telemetry::SyncUpdate;
use sentinel_guard::{FrameProcessor, LogLevel, LogSink, SentinelConfig};

fn beijing(h: u32, m: u32) -> DateTime<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 5, 1, h, m, 0)
        .unwrap()
}

fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Polygon {
    Polygon::new(vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]]).unwrap()
}

/// 躯干倾斜45°, 大腿竖直: 按判定表为 lying_down
fn lying_pairs(dx: f32) -> Vec<f32> {
    let mut pts = vec![[-1.0f32, -1.0]; 17];
    pts[0] = [0.25, 0.25];
    pts[5] = [0.29, 0.31];
    pts[6] = [0.31, 0.29];
    pts[11] = [0.49, 0.50];
    pts[12] = [0.51, 0.50];
    pts[13] = [0.49, 0.70];
    pts[14] = [0.51, 0.70];
    pts[15] = [0.49, 0.90];
    pts[16] = [0.51, 0.90];
    pts.iter().flat_map(|[x, y]| [x + dx, *y]).collect()
}

fn standing_pairs() -> Vec<f32> {
    let mut pts = vec![[-1.0f32, -1.0]; 17];
    pts[0] = [0.8, 0.10];
    pts[5] = [0.75, 0.20];
    pts[6] = [0.85, 0.20];
    pts[11] = [0.76, 0.50];
    pts[12] = [0.84, 0.50];
    pts[13] = [0.76, 0.70];
    pts[14] = [0.84, 0.70];
    pts[15] = [0.76, 0.90];
    pts[16] = [0.84, 0.90];
    pts.into_iter().flatten().collect()
}

fn object(id: u32, h: f32, keypoints: Vec<f32>) -> serde_json::Value {
    json!({
        "track_id": id,
        "bbox": { "x": 100.0, "y": 400.0 - h, "w": 80.0, "h": h },
        "keypoints": keypoints,
    })
}

/// 模拟上游逐行输出
fn line(objects: Vec<serde_json::Value>, lost_ids: Vec<u32>) -> FrameInput {
    let raw = json!({ "objects": objects, "lost_ids": lost_ids }).to_string();
    serde_json::from_str(&raw).unwrap()
}

fn processor() -> (FrameProcessor, LogSink) {
    let sink = LogSink::new(1024, LogLevel::Debug, Vec::new());
    let mut fp = FrameProcessor::new(&SentinelConfig::default(), sink.logger());
    fp.apply_update(SyncUpdate::Zones(ZoneType::Floor, vec![rect(0.0, 0.0, 0.6, 1.0)]));
    fp.apply_update(SyncUpdate::Zones(ZoneType::Safe, vec![rect(0.7, 0.0, 1.0, 1.0)]));
    (fp, sink)
}

#[test]
fn test_lying_verdicts_depend_on_zone() {
    let (mut fp, _sink) = processor();
    let frame = line(
        vec![object(1, 120.0, lying_pairs(0.0)), object(2, 120.0, lying_pairs(0.15))],
        vec![],
    );
    let events = fp.process(&frame, &beijing(12, 0));
    assert_eq!(events.len(), 2);

    let on_floor = events.iter().find(|e| e.track_id == 1).unwrap();
    assert_eq!(on_floor.pose_code, Some(3));
    assert_eq!(on_floor.verdict, Some(SafetyVerdict::unsafe_(ReasonCode::LyingOnFloor)));
    assert_eq!(on_floor.zones, vec![ZoneType::Floor]);

    let outside = events.iter().find(|e| e.track_id == 2).unwrap();
    assert_eq!(outside.verdict, Some(SafetyVerdict::unsafe_(ReasonCode::LyingOutsideSafe)));

    assert_eq!(fp.unsafe_tracks(), vec![1, 2]);
}

#[test]
fn test_standing_in_safe_area() {
    let (mut fp, _sink) = processor();
    let events = fp.process(&line(vec![object(5, 300.0, standing_pairs())], vec![]), &beijing(9, 0));
    assert_eq!(events[0].verdict, Some(SafetyVerdict::safe(ReasonCode::InSafeArea)));
    assert_eq!(events[0].zones, vec![ZoneType::Safe]);
}

#[test]
fn test_fall_then_recovery() {
    let (mut fp, _sink) = processor();
    let now = beijing(15, 0);

    let mut fallen = false;
    for i in 0..6 {
        let h = 300.0 - 40.0 * i as f32;
        let events = fp.process(&line(vec![object(9, h, standing_pairs())], vec![]), &now);
        if events[0].fall_asserted {
            assert_eq!(events[0].verdict, Some(SafetyVerdict::fall()));
            fallen = true;
        }
    }
    assert!(fallen);

    // 静止后窗口内速度归零, 计数器逐帧衰减
    let mut last = None;
    for _ in 0..12 {
        let events = fp.process(&line(vec![object(9, 100.0, standing_pairs())], vec![]), &now);
        last = events.into_iter().next();
    }
    let last = last.unwrap();
    assert!(!last.fall_asserted);
    assert_eq!(last.fall.counter_a, 0);
    assert_eq!(last.verdict, Some(SafetyVerdict::safe(ReasonCode::InSafeArea)));
}

#[test]
fn test_lost_track_is_forgotten() {
    let (mut fp, _sink) = processor();
    let now = beijing(10, 0);
    fp.process(&line(vec![object(4, 300.0, standing_pairs())], vec![]), &now);
    assert!(fp.store().get(4).is_some());

    let events = fp.process(&line(vec![], vec![4]), &now);
    assert!(events.is_empty());
    assert!(fp.store().get(4).is_none());
    assert_eq!(fp.snapshot(0, Default::default()).active_tracks, 0);
}

#[test]
fn test_event_serializes_to_flat_json() {
    let (mut fp, _sink) = processor();
    let events = fp.process(&line(vec![object(1, 120.0, lying_pairs(0.0))], vec![]), &beijing(12, 0));
    let value = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(value["track_id"], 1);
    assert_eq!(value["pose_label"], "lying_down");
    assert_eq!(value["verdict"]["reason"], "lying_on_floor");
    assert_eq!(value["fall"]["counter_a"], 0);
    assert_eq!(value["zones"][0], "floor");
}
