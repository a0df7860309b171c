//! 帧/背景图上传线程
//!
//! 两个单槽邮箱, 背景图严格优先. 帧上传受最小间隔限制 (距上次成功上传).
//! 失败时保留邮箱内容, 下一个tick重试.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::backend::Backend;
use super::mailbox::Mailbox;
use super::messages::EncodedImage;
use super::worker::{sleep_while_running, WorkerStats};
use crate::config::TelemetryConfig;
use crate::log_sink::Logger;

const TAG: &str = "uploader";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploaderSettings {
    pub tick: Duration,
    pub min_interval: Duration,
    pub frame_timeout: Duration,
    pub background_timeout: Duration,
}

impl From<&TelemetryConfig> for UploaderSettings {
    fn from(c: &TelemetryConfig) -> Self {
        Self {
            tick: Duration::from_millis(c.uploader_tick_ms),
            min_interval: Duration::from_millis(c.min_upload_interval_ms),
            frame_timeout: Duration::from_millis(c.frame_upload_timeout_ms),
            background_timeout: Duration::from_millis(c.background_upload_timeout_ms),
        }
    }
}

/// 生产者端句柄 (可克隆, 写入永不阻塞)
#[derive(Clone, Default)]
pub struct UploadQueue {
    frames: Arc<Mailbox<EncodedImage>>,
    backgrounds: Arc<Mailbox<EncodedImage>>,
    in_flight: Arc<AtomicBool>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_frame(&self, image: EncodedImage) {
        self.frames.post(image);
    }

    pub fn post_background(&self, image: EncodedImage) {
        self.backgrounds.post(image);
    }

    /// 是否有上传正在进行
    pub fn is_uploading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 被覆盖 (未上传即丢弃) 的总数
    pub fn overwritten(&self) -> u64 {
        self.frames.overwritten() + self.backgrounds.overwritten()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    Frame,
    Background,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    RateLimited,
    Uploaded(UploadKind),
    Failed(UploadKind),
}

pub struct FrameUploader {
    backend: Arc<dyn Backend>,
    queue: UploadQueue,
    settings: UploaderSettings,
    stats: Arc<WorkerStats>,
    last_success: Option<Instant>,
    log: Logger,
}

impl FrameUploader {
    pub fn new(
        backend: Arc<dyn Backend>,
        queue: UploadQueue,
        settings: UploaderSettings,
        stats: Arc<WorkerStats>,
        log: Logger,
    ) -> Self {
        Self {
            backend,
            queue,
            settings,
            stats,
            last_success: None,
            log,
        }
    }

    fn rate_limited(&self) -> bool {
        self.last_success
            .is_some_and(|t| t.elapsed() < self.settings.min_interval)
    }

    /// 执行一轮调度
    pub fn tick(&mut self) -> TickOutcome {
        if self.queue.is_uploading() {
            return TickOutcome::Idle;
        }

        if let Some(letter) = self.queue.backgrounds.take() {
            return self.upload(UploadKind::Background, letter.seq, &letter.item);
        }

        if self.queue.frames.is_pending() && self.rate_limited() {
            return TickOutcome::RateLimited;
        }
        match self.queue.frames.take() {
            Some(letter) => self.upload(UploadKind::Frame, letter.seq, &letter.item),
            None => TickOutcome::Idle,
        }
    }

    fn upload(&mut self, kind: UploadKind, seq: u64, image: &EncodedImage) -> TickOutcome {
        self.queue.in_flight.store(true, Ordering::SeqCst);
        let result = match kind {
            UploadKind::Frame => self.backend.upload_frame(image, self.settings.frame_timeout),
            UploadKind::Background => self
                .backend
                .upload_background(image, self.settings.background_timeout),
        };
        self.queue.in_flight.store(false, Ordering::SeqCst);

        let mailbox = match kind {
            UploadKind::Frame => &self.queue.frames,
            UploadKind::Background => &self.queue.backgrounds,
        };
        match result {
            Ok(()) => {
                mailbox.clear_if(seq);
                self.last_success = Some(Instant::now());
                self.stats.success();
                TickOutcome::Uploaded(kind)
            }
            Err(e) => {
                mailbox.release(seq);
                self.stats.failure();
                self.log
                    .warn(TAG, format!("⚠️ {:?} 上传失败 ({} 字节): {}", kind, image.len(), e));
                TickOutcome::Failed(kind)
            }
        }
    }

    pub fn run(mut self, running: Arc<AtomicBool>) {
        self.log.info(TAG, "📤 上传线程启动");
        while running.load(Ordering::SeqCst) {
            self.tick();
            if !sleep_while_running(&running, self.settings.tick) {
                break;
            }
        }
        self.log.info(TAG, "🛑 上传线程退出");
    }
}
