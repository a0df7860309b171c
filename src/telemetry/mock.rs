//! 测试用后端: 记录调用, 可注入失败与延迟

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::backend::{Backend, BackendError, FlagMap};
use super::messages::{EncodedImage, StateSnapshot, TrackEvent};
use crate::detection::zone::{Polygon, ZoneType};

#[derive(Default)]
pub struct MockBackend {
    pub fail: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    /// 首次调用时额外阻塞 (用于模拟慢上传)
    pub first_call_delay: Mutex<Option<Duration>>,

    pub frames: Mutex<Vec<EncodedImage>>,
    pub backgrounds: Mutex<Vec<EncodedImage>>,
    pub flags: Mutex<FlagMap>,
    pub zones: Mutex<HashMap<ZoneType, Vec<Polygon>>>,
    pub snapshots: Mutex<Vec<StateSnapshot>>,
    pub events: Mutex<Vec<TrackEvent>>,

    pub calls: AtomicU64,
    pub flag_calls: AtomicU64,
    pub zone_calls: AtomicU64,
    pub heartbeats: AtomicU64,
}

impl MockBackend {
    pub fn failing() -> Self {
        let mock = Self::default();
        mock.fail.store(true, Ordering::SeqCst);
        mock
    }

    fn enter(&self) -> Result<(), BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            if let Some(d) = *self.first_call_delay.lock() {
                std::thread::sleep(d);
            }
        }
        if let Some(d) = *self.delay.lock() {
            std::thread::sleep(d);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Status(503));
        }
        Ok(())
    }
}

impl Backend for MockBackend {
    fn upload_frame(&self, image: &EncodedImage, _timeout: Duration) -> Result<(), BackendError> {
        self.enter()?;
        self.frames.lock().push(image.clone());
        Ok(())
    }

    fn upload_background(&self, image: &EncodedImage, _timeout: Duration) -> Result<(), BackendError> {
        self.enter()?;
        self.backgrounds.lock().push(image.clone());
        Ok(())
    }

    fn fetch_flags(&self, _timeout: Duration) -> Result<FlagMap, BackendError> {
        self.flag_calls.fetch_add(1, Ordering::SeqCst);
        self.enter()?;
        Ok(self.flags.lock().clone())
    }

    fn fetch_zones(&self, zone_type: ZoneType, _timeout: Duration) -> Result<Vec<Polygon>, BackendError> {
        self.zone_calls.fetch_add(1, Ordering::SeqCst);
        self.enter()?;
        Ok(self.zones.lock().get(&zone_type).cloned().unwrap_or_default())
    }

    fn heartbeat(&self, _timeout: Duration) -> Result<(), BackendError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        self.enter()
    }

    fn report_state(&self, snapshot: &StateSnapshot, _timeout: Duration) -> Result<(), BackendError> {
        self.enter()?;
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }

    fn post_event(&self, event: &TrackEvent, _timeout: Duration) -> Result<(), BackendError> {
        self.enter()?;
        self.events.lock().push(event.clone());
        Ok(())
    }
}
