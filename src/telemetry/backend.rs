//! 后端接口 (Backend)
//!
//! 所有网络交互都经过 `Backend` trait, 每次调用都带超时.
//! `HttpBackend` 基于 ureq 同步请求, 路径统一为 `{base_url}/devices/{device_id}/...`

use std::io;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use super::messages::{EncodedImage, StateSnapshot, TrackEvent};
use crate::detection::zone::{Polygon, ZoneType};

pub type FlagMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request timed out")]
    Timeout,

    #[error("backend returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl From<ureq::Error> for BackendError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(code, _) => BackendError::Status(code),
            ureq::Error::Transport(t) if is_timeout(&t) => BackendError::Timeout,
            ureq::Error::Transport(t) => BackendError::Transport(t.to_string()),
        }
    }
}

/// 连接/读写超时: 底层 io 错误为 TimedOut (部分平台为 WouldBlock)
fn is_timeout(t: &ureq::Transport) -> bool {
    if !matches!(t.kind(), ureq::ErrorKind::Io | ureq::ErrorKind::ConnectionFailed) {
        return false;
    }
    std::error::Error::source(t)
        .and_then(|e| e.downcast_ref::<io::Error>())
        .is_some_and(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
}

pub trait Backend: Send + Sync {
    /// 上传最新帧
    fn upload_frame(&self, image: &EncodedImage, timeout: Duration) -> Result<(), BackendError>;

    /// 上传背景图
    fn upload_background(&self, image: &EncodedImage, timeout: Duration) -> Result<(), BackendError>;

    /// 拉取扁平参数表
    fn fetch_flags(&self, timeout: Duration) -> Result<FlagMap, BackendError>;

    /// 拉取某类区域的多边形
    fn fetch_zones(&self, zone_type: ZoneType, timeout: Duration) -> Result<Vec<Polygon>, BackendError>;

    fn heartbeat(&self, timeout: Duration) -> Result<(), BackendError>;

    fn report_state(&self, snapshot: &StateSnapshot, timeout: Duration) -> Result<(), BackendError>;

    fn post_event(&self, event: &TrackEvent, timeout: Duration) -> Result<(), BackendError>;
}

pub struct HttpBackend {
    agent: ureq::Agent,
    base: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, device_id: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base: format!("{}/devices/{}", base_url.trim_end_matches('/'), device_id),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn post_bytes(
        &self,
        path: &str,
        content_type: &str,
        body: &[u8],
        timeout: Duration,
    ) -> Result<(), BackendError> {
        self.agent
            .post(&self.url(path))
            .timeout(timeout)
            .set("Content-Type", content_type)
            .send_bytes(body)?;
        Ok(())
    }

    fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec(body).map_err(|e| BackendError::Decode(e.to_string()))?;
        self.post_bytes(path, "application/json", &bytes, timeout)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, timeout: Duration) -> Result<T, BackendError> {
        let response = self.agent.get(&self.url(path)).timeout(timeout).call()?;
        let body = response
            .into_string()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

impl Backend for HttpBackend {
    fn upload_frame(&self, image: &EncodedImage, timeout: Duration) -> Result<(), BackendError> {
        self.post_bytes("frame", "image/jpeg", &image.bytes, timeout)
    }

    fn upload_background(&self, image: &EncodedImage, timeout: Duration) -> Result<(), BackendError> {
        self.post_bytes("background", "image/jpeg", &image.bytes, timeout)
    }

    fn fetch_flags(&self, timeout: Duration) -> Result<FlagMap, BackendError> {
        self.get_json("flags", timeout)
    }

    fn fetch_zones(&self, zone_type: ZoneType, timeout: Duration) -> Result<Vec<Polygon>, BackendError> {
        // 顶点不足3个的多边形直接丢弃
        let raw: Vec<Vec<[f32; 2]>> = self.get_json(&format!("zones/{}", zone_type.as_str()), timeout)?;
        Ok(raw.into_iter().filter_map(Polygon::new).collect())
    }

    fn heartbeat(&self, timeout: Duration) -> Result<(), BackendError> {
        self.post_bytes("heartbeat", "application/json", b"{}", timeout)
    }

    fn report_state(&self, snapshot: &StateSnapshot, timeout: Duration) -> Result<(), BackendError> {
        self.post_json("state", snapshot, timeout)
    }

    fn post_event(&self, event: &TrackEvent, timeout: Duration) -> Result<(), BackendError> {
        self.post_json("events", event, timeout)
    }
}
