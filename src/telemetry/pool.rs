//! 有界任务池 (fire-and-forget)
//!
//! 固定数量的工作线程消费一个有界队列. `submit` 永不阻塞, 队列满时丢弃并计数.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::worker::{join_with_timeout, WorkerStats, SLEEP_SLICE};

type Task = Box<dyn FnOnce() -> bool + Send + 'static>;

pub struct TaskPool {
    tx: Option<Sender<Task>>,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl TaskPool {
    /// 启动 `workers` 个线程, 队列容量 `capacity`
    pub fn new(name: &str, workers: usize, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<Task>(capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(WorkerStats::default());

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let running = running.clone();
            let stats = stats.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || worker_loop(rx, running, stats))?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            running,
            handles,
            stats,
        })
    }

    /// 提交任务; 任务返回值表示是否成功. 队列满或已停止时返回 false
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => {
                self.stats.drop_one();
                return false;
            }
        };
        match tx.try_send(Box::new(task)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.drop_one();
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.tx.as_ref().map(|tx| tx.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// 停止: 不再接收新任务, 等待线程退出 (总时长不超过 `timeout`), 返回未执行即丢弃的任务数
    pub fn shutdown(&mut self, timeout: Duration) -> usize {
        let discarded = self.pending();
        self.running.store(false, Ordering::SeqCst);
        self.tx = None;

        let deadline = Instant::now() + timeout;
        for handle in self.handles.drain(..) {
            let left = deadline.saturating_duration_since(Instant::now());
            join_with_timeout(handle, left);
        }
        discarded
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.shutdown(Duration::from_millis(100));
        }
    }
}

fn worker_loop(rx: Receiver<Task>, running: Arc<AtomicBool>, stats: Arc<WorkerStats>) {
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(SLEEP_SLICE) {
            Ok(task) => {
                if task() {
                    stats.success();
                } else {
                    stats.failure();
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
