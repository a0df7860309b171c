//! 配置 - 本地JSON文件 + 远程下发的安全参数

use std::fs;
use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::fall::FallAlgorithm;
use crate::detection::safety::SafetyPolicy;
use crate::detection::zone::CouchPolicy;
use crate::log_sink::{LogLevel, Logger};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 配置加载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// 文件不存在, 已写入默认配置
    Created,
    /// 文件解析失败, 使用默认值
    Fallback(String),
}

// ========== 远程安全参数 ==========

/// 远程下发的扁平参数表的强类型形式
///
/// 未知键忽略, 缺失键取默认值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyFlags {
    pub fall_algorithm: FallAlgorithm,
    pub safety_check_enabled: bool,
    pub max_nap_minutes: u32,
    #[serde(with = "hhmm")]
    pub bedtime: NaiveTime,
    #[serde(with = "hhmm")]
    pub wake_time: NaiveTime,
    pub bed_max_dwell_minutes: u32,
}

impl Default for SafetyFlags {
    fn default() -> Self {
        Self {
            fall_algorithm: FallAlgorithm::BboxMotion,
            safety_check_enabled: true,
            max_nap_minutes: 60,
            bedtime: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            wake_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            bed_max_dwell_minutes: 720,
        }
    }
}

impl SafetyFlags {
    /// 从远程参数表解析
    pub fn from_map(map: &serde_json::Map<String, serde_json::Value>) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(serde_json::Value::Object(map.clone()))?)
    }

    pub fn policy(&self) -> SafetyPolicy {
        SafetyPolicy {
            bed_max_dwell: chrono::Duration::minutes(self.bed_max_dwell_minutes as i64),
            couch: CouchPolicy::new(
                self.bedtime,
                self.wake_time,
                chrono::Duration::minutes(self.max_nap_minutes as i64),
            ),
        }
    }
}

/// "HH:MM" ↔ NaiveTime
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}

// ========== 遥测参数 ==========

/// 遥测工作线程参数 (毫秒)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    // === 图像上传 ===
    pub uploader_tick_ms: u64,
    pub min_upload_interval_ms: u64,
    pub frame_upload_timeout_ms: u64,
    pub background_upload_timeout_ms: u64,

    // === 配置/区域同步 ===
    pub flags_poll_ms: u64,
    pub zone_poll_ms: u64,
    pub sync_backoff_poll_ms: u64,
    pub sync_error_threshold: u32,
    pub sync_timeout_ms: u64,
    pub sync_queue_capacity: usize,

    // === 心跳 ===
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,

    // === 状态上报 ===
    pub state_report_interval_ms: u64,
    pub state_report_timeout_ms: u64,

    // === 事件投递 ===
    pub event_workers: usize,
    pub event_queue_capacity: usize,
    pub event_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            uploader_tick_ms: 20,
            min_upload_interval_ms: 100,
            frame_upload_timeout_ms: 2000,
            background_upload_timeout_ms: 5000,

            flags_poll_ms: 5_000,
            zone_poll_ms: 10_000,
            sync_backoff_poll_ms: 60_000,
            sync_error_threshold: 5,
            sync_timeout_ms: 2000,
            sync_queue_capacity: 32,

            heartbeat_interval_ms: 250,
            heartbeat_timeout_ms: 500,

            state_report_interval_ms: 30_000,
            state_report_timeout_ms: 2000,

            event_workers: 2,
            event_queue_capacity: 256,
            event_timeout_ms: 2000,
        }
    }
}

// ========== 本地配置 ==========

/// 数字卫兵本地配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    // === 后端 ===
    pub backend_url: String,
    pub device_id: String,

    // === 检测参数 ===
    pub fps: f32,                     // 上游帧率
    pub fall_velocity_threshold: f32, // 检测框速度阈值 (像素/毫秒)
    pub history_capacity: usize,      // 每个目标的历史窗口
    pub max_missed_frames: u32,       // 缺失多少帧后清除目标

    // === 日志 ===
    pub log_capacity: usize,
    pub log_level: LogLevel,
    pub muted_tags: Vec<String>,

    pub telemetry: TelemetryConfig,

    /// 首次同步成功前使用的安全参数
    pub flags: SafetyFlags,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8080/api".to_string(),
            device_id: "sentinel-0".to_string(),

            fps: 30.0,
            fall_velocity_threshold: 0.17,
            history_capacity: 5,
            max_missed_frames: 60,

            log_capacity: 1000,
            log_level: LogLevel::Info,
            muted_tags: Vec::new(),

            telemetry: TelemetryConfig::default(),
            flags: SafetyFlags::default(),
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置; 文件不存在时写入默认配置, 解析失败时使用默认值
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, LoadOutcome), ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(config) => {
                    config.validate()?;
                    Ok((config, LoadOutcome::Loaded))
                }
                Err(e) => Ok((Self::default(), LoadOutcome::Fallback(e.to_string()))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path)?;
                Ok((config, LoadOutcome::Created))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!("fps must be > 0, got {}", self.fps)));
        }
        if self.history_capacity < 2 {
            return Err(ConfigError::Invalid(
                "history_capacity must be >= 2".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::Invalid("log_capacity must be > 0".to_string()));
        }
        if self.telemetry.event_workers == 0 {
            return Err(ConfigError::Invalid("event_workers must be > 0".to_string()));
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self, log: &Logger) {
        log.info("config", "🎛️  当前配置:");
        log.info("config", format!("  后端: {} (设备 {})", self.backend_url, self.device_id));
        log.info(
            "config",
            format!(
                "  帧率: {:.0} | 速度阈值: {:.2} | 历史窗口: {}",
                self.fps, self.fall_velocity_threshold, self.history_capacity
            ),
        );
        log.info(
            "config",
            format!(
                "  跌倒算法: {:?} | 区域判定: {} | 作息: {}-{}",
                self.flags.fall_algorithm,
                self.flags.safety_check_enabled,
                self.flags.bedtime.format("%H:%M"),
                self.flags.wake_time.format("%H:%M")
            ),
        );
        log.info(
            "config",
            format!(
                "  心跳: {}ms | 状态上报: {}ms",
                self.telemetry.heartbeat_interval_ms, self.telemetry.state_report_interval_ms
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flags_from_map() {
        let map = json!({
            "fall_algorithm": 2,
            "safety_check_enabled": false,
            "max_nap_minutes": 30,
            "bedtime": "21:30",
            "wake_time": "07:15",
            "unrelated_flag": 1.5
        });
        let flags = SafetyFlags::from_map(map.as_object().unwrap()).unwrap();
        assert_eq!(flags.fall_algorithm, FallAlgorithm::MotionAndPose);
        assert!(!flags.safety_check_enabled);
        assert_eq!(flags.max_nap_minutes, 30);
        assert_eq!(flags.bedtime, NaiveTime::from_hms_opt(21, 30, 0).unwrap());
        assert_eq!(flags.wake_time, NaiveTime::from_hms_opt(7, 15, 0).unwrap());
        assert_eq!(flags.bed_max_dwell_minutes, 720);
    }

    #[test]
    fn test_flags_reject_malformed_values() {
        let bad_time = json!({ "bedtime": "late" });
        assert!(SafetyFlags::from_map(bad_time.as_object().unwrap()).is_err());
        let bad_algo = json!({ "fall_algorithm": 3 });
        assert!(SafetyFlags::from_map(bad_algo.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_flags_policy() {
        let policy = SafetyFlags::default().policy();
        assert_eq!(policy.couch.max_nap, chrono::Duration::minutes(60));
        assert_eq!(policy.bed_max_dwell, chrono::Duration::minutes(720));
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        let (config, outcome) = SentinelConfig::load(&path).unwrap();
        assert_eq!(outcome, LoadOutcome::Created);
        assert_eq!(config, SentinelConfig::default());

        let (again, outcome) = SentinelConfig::load(&path).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(again, config);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(&path, r#"{ "fps": 15.0, "telemetry": { "heartbeat_interval_ms": 1000 } }"#)
            .unwrap();
        let (config, outcome) = SentinelConfig::load(&path).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(config.fps, 15.0);
        assert_eq!(config.telemetry.heartbeat_interval_ms, 1000);
        assert_eq!(config.telemetry.min_upload_interval_ms, 100);
    }

    #[test]
    fn test_load_garbage_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(&path, "not json").unwrap();
        let (config, outcome) = SentinelConfig::load(&path).unwrap();
        assert!(matches!(outcome, LoadOutcome::Fallback(_)));
        assert_eq!(config, SentinelConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_fps() {
        let config = SentinelConfig {
            fps: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
