//! 日志队列 (LogSink)
//!
//! 多生产者, 单消费线程顺序输出. `put` 永不阻塞: 队列满时丢弃最新一条并计数.
//! 级别/标签过滤在入队前完成.

use std::collections::HashSet;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::telemetry::worker::join_with_timeout;

/// 默认队列容量
pub const DEFAULT_CAPACITY: usize = 1000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// 一条日志
#[derive(Clone, Debug)]
pub struct LogRecord {
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
    pub time: chrono::DateTime<chrono::Local>,
}

impl LogRecord {
    /// `[时间] 级别 [标签] 内容`
    pub fn render(&self) -> String {
        format!(
            "[{}] {:<5} [{}] {}",
            self.time.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level.as_str(),
            self.tag,
            self.message
        )
    }
}

struct Filter {
    min_level: LogLevel,
    muted: HashSet<String>,
}

struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
}

/// 日志句柄 (可克隆, 传给各组件)
#[derive(Clone)]
pub struct Logger {
    tx: Sender<LogRecord>,
    filter: Arc<Filter>,
    counters: Arc<Counters>,
}

impl Logger {
    /// 入队一条日志, 返回是否入队成功
    pub fn put(&self, level: LogLevel, tag: &str, message: impl Into<String>) -> bool {
        if level < self.filter.min_level || self.filter.muted.contains(tag) {
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let record = LogRecord {
            level,
            tag: tag.to_string(),
            message: message.into(),
            time: chrono::Local::now(),
        };
        match self.tx.try_send(record) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn debug(&self, tag: &str, message: impl Into<String>) {
        self.put(LogLevel::Debug, tag, message);
    }

    pub fn info(&self, tag: &str, message: impl Into<String>) {
        self.put(LogLevel::Info, tag, message);
    }

    pub fn warn(&self, tag: &str, message: impl Into<String>) {
        self.put(LogLevel::Warn, tag, message);
    }

    pub fn error(&self, tag: &str, message: impl Into<String>) {
        self.put(LogLevel::Error, tag, message);
    }

    /// 队列满被丢弃的条数
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.counters.filtered.load(Ordering::Relaxed)
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub struct LogSink {
    logger: Logger,
    rx: Receiver<LogRecord>,
    out: SharedWriter,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LogSink {
    /// 输出到标准输出
    pub fn new(capacity: usize, min_level: LogLevel, muted: impl IntoIterator<Item = String>) -> Self {
        Self::with_writer(capacity, min_level, muted, Box::new(std::io::stdout()))
    }

    pub fn with_writer(
        capacity: usize,
        min_level: LogLevel,
        muted: impl IntoIterator<Item = String>,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let logger = Logger {
            tx,
            filter: Arc::new(Filter {
                min_level,
                muted: muted.into_iter().collect(),
            }),
            counters: Arc::new(Counters {
                accepted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                filtered: AtomicU64::new(0),
            }),
        };
        Self {
            logger,
            rx,
            out: Arc::new(Mutex::new(writer)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn logger(&self) -> Logger {
        self.logger.clone()
    }

    /// 启动消费线程
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let rx = self.rx.clone();
        let out = self.out.clone();
        let running = self.running.clone();
        let handle = std::thread::Builder::new()
            .name("log-sink".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(record) => write_record(&out, &record),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
                // 退出前输出已入队的日志
                while let Ok(record) = rx.try_recv() {
                    write_record(&out, &record);
                }
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// 停止消费线程: 通知 → 限时等待退出 → 同步输出剩余日志. 返回补输出的条数
    ///
    /// 消费线程未在时限内退出时不补输出, 剩余日志仍由它按序写出.
    pub fn stop(&mut self, timeout: Duration) -> usize {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if !join_with_timeout(handle, timeout) {
                return 0;
            }
        }

        let mut drained = 0;
        while let Ok(record) = self.rx.try_recv() {
            write_record(&self.out, &record);
            drained += 1;
        }
        drained
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop(Duration::from_millis(200));
        }
    }
}

/// 整行写出, 持锁保证不交错
fn write_record(out: &SharedWriter, record: &LogRecord) {
    let line = record.render();
    let mut w = out.lock();
    let _ = writeln!(w, "{}", line);
    let _ = w.flush();
}
