//! 遥测子系统 (Telemetry)
//!
//! 独立的后台工作线程:
//! - 上传线程:   帧/背景图单槽邮箱, 背景图优先
//! - 同步线程:   定时拉取安全参数与区域, 经有界队列交给帧处理线程
//! - 心跳线程:   短间隔, 仅在已注册时发送
//! - 状态上报:   长间隔推送状态快照
//! - 事件投递:   有界任务池, 帧处理线程只提交不等待

pub mod backend;
pub mod heartbeat;
pub mod mailbox;
pub mod messages;
pub mod pool;
pub mod reporter;
pub mod sync;
pub mod uploader;
pub mod worker;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

pub use backend::{Backend, BackendError, HttpBackend};
pub use messages::{EncodedImage, StateSnapshot, SyncUpdate, TelemetryCounters, TrackEvent, WorkerCounters};

use crate::config::TelemetryConfig;
use crate::log_sink::Logger;
use heartbeat::HeartbeatPinger;
use pool::TaskPool;
use reporter::{SnapshotSlot, StateReporter};
use sync::{SyncSettings, SyncWorker};
use uploader::{FrameUploader, UploadQueue, UploaderSettings};
use worker::{join_with_timeout, WorkerStats};

const TAG: &str = "telemetry";

#[derive(Default)]
struct PoolStats {
    uploads: Arc<WorkerStats>,
    sync: Arc<WorkerStats>,
    heartbeat: Arc<WorkerStats>,
    state_reports: Arc<WorkerStats>,
}

pub struct TelemetryWorkerPool {
    backend: Arc<dyn Backend>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    uploads: UploadQueue,
    sync_rx: Receiver<SyncUpdate>,
    snapshot: SnapshotSlot,
    events: TaskPool,
    event_timeout: Duration,
    stats: PoolStats,
    log: Logger,
}

impl TelemetryWorkerPool {
    /// 启动全部工作线程
    pub fn start(
        backend: Arc<dyn Backend>,
        config: &TelemetryConfig,
        registered: Arc<AtomicBool>,
        log: Logger,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let stats = PoolStats::default();
        let uploads = UploadQueue::new();
        let (sync_tx, sync_rx) = crossbeam_channel::bounded(config.sync_queue_capacity.max(1));
        let snapshot: SnapshotSlot = Arc::new(Mutex::new(None));
        let events = TaskPool::new("event", config.event_workers, config.event_queue_capacity)?;

        let mut handles = Vec::with_capacity(4);

        let uploader = FrameUploader::new(
            backend.clone(),
            uploads.clone(),
            UploaderSettings::from(config),
            stats.uploads.clone(),
            log.clone(),
        );
        handles.push(spawn("uploader", running.clone(), move |r| uploader.run(r))?);

        let syncer = SyncWorker::new(
            backend.clone(),
            sync_tx,
            SyncSettings::from(config),
            stats.sync.clone(),
            log.clone(),
        );
        handles.push(spawn("sync", running.clone(), move |r| syncer.run(r))?);

        let pinger = HeartbeatPinger::new(
            backend.clone(),
            registered,
            Duration::from_millis(config.heartbeat_interval_ms),
            Duration::from_millis(config.heartbeat_timeout_ms),
            stats.heartbeat.clone(),
            log.clone(),
        );
        handles.push(spawn("heartbeat", running.clone(), move |r| pinger.run(r))?);

        let reporter = StateReporter::new(
            backend.clone(),
            snapshot.clone(),
            Duration::from_millis(config.state_report_interval_ms),
            Duration::from_millis(config.state_report_timeout_ms),
            stats.state_reports.clone(),
            log.clone(),
        );
        handles.push(spawn("reporter", running.clone(), move |r| reporter.run(r))?);

        log.info(TAG, format!("✅ 遥测线程已启动 ({} 个事件线程)", config.event_workers));

        Ok(Self {
            backend,
            running,
            handles,
            uploads,
            sync_rx,
            snapshot,
            events,
            event_timeout: Duration::from_millis(config.event_timeout_ms),
            stats,
            log,
        })
    }

    /// 写入最新帧 (覆盖未上传的旧帧)
    pub fn post_frame(&self, image: EncodedImage) {
        self.uploads.post_frame(image);
    }

    pub fn post_background(&self, image: EncodedImage) {
        self.uploads.post_background(image);
    }

    /// 投递事件, 不等待结果. 队列满时丢弃
    pub fn submit_event(&self, event: TrackEvent) -> bool {
        let backend = self.backend.clone();
        let log = self.log.clone();
        let timeout = self.event_timeout;
        self.events.submit(move || match backend.post_event(&event, timeout) {
            Ok(()) => true,
            Err(e) => {
                log.debug(TAG, format!("事件投递失败 (目标 {}): {}", event.track_id, e));
                false
            }
        })
    }

    /// 帧处理线程读取同步结果的接收端
    pub fn sync_updates(&self) -> &Receiver<SyncUpdate> {
        &self.sync_rx
    }

    /// 更新状态快照 (下次上报时发送)
    pub fn publish_snapshot(&self, snapshot: StateSnapshot) {
        *self.snapshot.lock() = Some(snapshot);
    }

    pub fn counters(&self) -> TelemetryCounters {
        let mut uploads = self.stats.uploads.snapshot();
        uploads.dropped += self.uploads.overwritten();
        TelemetryCounters {
            uploads,
            sync: self.stats.sync.snapshot(),
            heartbeat: self.stats.heartbeat.snapshot(),
            state_reports: self.stats.state_reports.snapshot(),
            events: self.events.stats().snapshot(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 协作式停止: 置标志后限时回收线程, 未退出的线程随进程结束
    pub fn stop(&mut self, timeout: Duration) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let deadline = Instant::now() + timeout;
        let mut detached = 0;
        for handle in self.handles.drain(..) {
            let left = deadline.saturating_duration_since(Instant::now());
            if !join_with_timeout(handle, left) {
                detached += 1;
            }
        }
        let discarded = self
            .events
            .shutdown(deadline.saturating_duration_since(Instant::now()));

        if detached > 0 || discarded > 0 {
            self.log.warn(
                TAG,
                format!("⚠️ 遥测停止: {} 个线程未及时退出, 丢弃 {} 个事件", detached, discarded),
            );
        } else {
            self.log.info(TAG, "🛑 遥测线程已全部停止");
        }
    }
}

impl Drop for TelemetryWorkerPool {
    fn drop(&mut self) {
        self.stop(Duration::from_millis(200));
    }
}

fn spawn<F>(name: &str, running: Arc<AtomicBool>, body: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce(Arc<AtomicBool>) + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(running))
}
