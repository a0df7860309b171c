/// 数字卫兵 (Digital Sentinel)
///
/// 看护场景的安全分析服务
///
/// 系统架构:
/// 1. 主线程:     读取上游跟踪结果 (JSON Lines), 逐帧做跌倒/区域安全判定
/// 2. 遥测线程:   上传/同步/心跳/状态上报/事件投递 (独立工作线程)
/// 3. 日志线程:   单消费者顺序输出

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;

use sentinel_guard::config::LoadOutcome;
use sentinel_guard::detection::FrameInput;
use sentinel_guard::telemetry::{EncodedImage, HttpBackend, TelemetryWorkerPool};
use sentinel_guard::{FrameProcessor, LogSink, SentinelConfig, SentinelContext};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const TAG: &str = "main";

/// 数字卫兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "数字卫兵 - 跌倒与区域安全监测", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认配置)
    #[arg(short, long, default_value = "sentinel.json")]
    config: PathBuf,

    /// 跟踪结果输入 (JSON Lines, 每行一帧; "-" 表示标准输入)
    #[arg(short, long, default_value = "-")]
    input: String,

    /// 启动时上传的背景图 (JPEG)
    #[arg(short, long)]
    background: Option<PathBuf>,

    /// 设备已在后端注册 (启用心跳)
    #[arg(long)]
    registered: bool,

    /// 每多少帧刷新一次状态快照
    #[arg(long, default_value_t = 30)]
    snapshot_every: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // ========== 配置 ==========
    let (config, outcome) = SentinelConfig::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config.display()))?;

    // ========== 日志 ==========
    let mut sink = LogSink::new(config.log_capacity, config.log_level, config.muted_tags.clone());
    sink.start().context("启动日志线程失败")?;
    let log = sink.logger();

    log.info(TAG, "🚀 数字卫兵启动");
    match outcome {
        LoadOutcome::Loaded => log.info(TAG, format!("📂 已加载配置: {}", args.config.display())),
        LoadOutcome::Created => log.info(TAG, format!("📝 已写入默认配置: {}", args.config.display())),
        LoadOutcome::Fallback(e) => log.warn(TAG, format!("⚠️ 配置解析失败, 使用默认值: {}", e)),
    }
    config.print_summary(&log);

    let ctx = SentinelContext::new(config, log.clone());
    ctx.set_registered(args.registered);

    // ========== 遥测线程 ==========
    let backend = Arc::new(HttpBackend::new(&ctx.config.backend_url, &ctx.config.device_id));
    let mut telemetry = TelemetryWorkerPool::start(
        backend,
        &ctx.config.telemetry,
        ctx.registered_flag(),
        log.clone(),
    )
    .context("启动遥测线程失败")?;

    if let Some(path) = &args.background {
        let bytes = std::fs::read(path).with_context(|| format!("读取背景图失败: {}", path.display()))?;
        log.info(TAG, format!("🖼️ 背景图已提交: {} 字节", bytes.len()));
        telemetry.post_background(EncodedImage::new(bytes));
    }

    // ========== 主线程: 逐帧处理 ==========
    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = File::open(&args.input).with_context(|| format!("打开输入失败: {}", args.input))?;
        Box::new(BufReader::new(file))
    };

    let mut processor = FrameProcessor::new(&ctx.config, log.clone());
    let started = Instant::now();
    let mut malformed = 0u64;

    log.info(TAG, "✅ 系统就绪, 开始监测...");
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("读取输入失败")?;
        if line.trim().is_empty() {
            continue;
        }

        let frame: FrameInput = match serde_json::from_str(&line) {
            Ok(f) => f,
            Err(e) => {
                malformed += 1;
                log.warn(TAG, format!("⚠️ 第{}行无法解析: {}", line_no + 1, e));
                continue;
            }
        };

        processor.apply_sync_updates(telemetry.sync_updates());
        let events = processor.process(&frame, &chrono::Local::now());
        for event in events {
            telemetry.submit_event(event);
        }

        if processor.frame_count() % args.snapshot_every.max(1) == 0 {
            telemetry.publish_snapshot(processor.snapshot(log.dropped(), telemetry.counters()));
        }
    }

    // ========== 停止 ==========
    telemetry.publish_snapshot(processor.snapshot(log.dropped(), telemetry.counters()));
    let counters = telemetry.counters();
    log.info(
        TAG,
        format!(
            "📊 共处理 {} 帧 ({} 行无法解析), 用时 {:.1}s | 事件 {} 成功 / {} 丢弃 | 上传 {} 成功",
            processor.frame_count(),
            malformed,
            started.elapsed().as_secs_f64(),
            counters.events.succeeded,
            counters.events.dropped,
            counters.uploads.succeeded
        ),
    );

    telemetry.stop(Duration::from_secs(6));
    log.info(TAG, "👋 数字卫兵退出");
    sink.stop(Duration::from_secs(1));
    if log.dropped() > 0 {
        eprintln!("⚠️ 日志队列丢弃 {} 条", log.dropped());
    }
    Ok(())
}
