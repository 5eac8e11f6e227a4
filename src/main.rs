use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder as TokioRuntimeBuilder;
use tokio::signal;
use tokio::sync::watch;

use gold_feed::config::{Config, LoggingConfig, CONFIG_FILE};
use gold_feed::dispatcher::handler;
use gold_feed::events::{ConnectionStatus, FeedKind};
use gold_feed::feeds::{NotificationFeed, QuoteFeed};
use gold_feed::pricing::{PriceHealth, QuoteBoard};
use gold_feed::stats::FeedStats;

fn main() -> Result<()> {
    // 설정 로드 (런타임 쓰레드 수를 적용하기 위함)
    let (config, source) = Config::load_with_source()?;
    let config = Arc::new(config);

    init_logging(&config.logging);
    match source {
        Some(path) => info!("📋 config loaded from {}", path.display()),
        None => warn!("⚠️ {} not found, using defaults", CONFIG_FILE),
    }

    let rt = match config.runtime_threads.filter(|t| *t > 0) {
        Some(t) => {
            info!("🧵 building multi-thread runtime: worker_threads={}", t);
            TokioRuntimeBuilder::new_multi_thread().worker_threads(t).enable_all().build()
        }
        None => {
            info!("🧵 building multi-thread runtime: default worker count");
            TokioRuntimeBuilder::new_multi_thread().enable_all().build()
        }
    }
    .map_err(|e| anyhow::anyhow!("failed to build tokio runtime: {}", e))?;

    rt.block_on(async_main(config))
}

fn init_logging(logging: &LoggingConfig) {
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&logging.level));
    logger
        .filter_module("tokio_tungstenite", log::LevelFilter::Info)
        .filter_module("tungstenite", log::LevelFilter::Info);
    if let Some(ref path) = logging.file_path {
        let path = std::path::Path::new(path);
        let _ = std::fs::create_dir_all(path.parent().unwrap_or(std::path::Path::new(".")));
        match std::fs::File::create(path) {
            Ok(file) => {
                logger.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("⚠️ cannot open log file {}: {}, logging to stderr", path.display(), e),
        }
    }
    logger.init();
}

async fn async_main(config: Arc<Config>) -> Result<()> {
    let timeout_seconds = parse_timeout_arg();

    info!("🚀 gold-feed starting...");
    match timeout_seconds {
        Some(timeout) => info!("⏰ shutting down automatically in {}s", timeout),
        None => info!("🔄 running until Ctrl+C"),
    }

    let quote = if config.quote.enabled {
        let feed = QuoteFeed::start_ws(&config)?;
        let prices = feed.prices();
        feed.client().subscribe(handler(move |message| {
            let board = QuoteBoard::from_message(message);
            let state = prices.snapshot();
            info!(
                "💰 {} buy={} sell={:.2} change={:+.2} ({:+.3}%) [{} instruments]",
                state.source.as_deref().unwrap_or("-"),
                state.price_display(),
                state.current_sell,
                state.change,
                state.change_percent,
                board.len()
            );
            Ok(())
        }));
        Some(feed)
    } else {
        info!("quote feed disabled");
        None
    };

    let notification = if config.notification.enabled {
        let feed = NotificationFeed::start_ws(&config)?;
        feed.client().subscribe(handler(|message| {
            info!("🔔 notification: {}", message);
            Ok(())
        }));
        Some(feed)
    } else {
        info!("notification feed disabled");
        None
    };

    if quote.is_none() && notification.is_none() {
        warn!("⚠️ no feed enabled, nothing to do");
        return Ok(());
    }

    let mut reported: Vec<(FeedKind, Arc<FeedStats>)> = Vec::new();
    if let Some(feed) = &quote {
        spawn_status_watcher(feed.client().status());
        reported.push((feed.client().kind(), feed.client().stats_handle()));
        feed.client().connect();
    }
    if let Some(feed) = &notification {
        spawn_status_watcher(feed.client().status());
        reported.push((feed.client().kind(), feed.client().stats_handle()));
        feed.client().connect();
    }

    if config.metrics.enabled {
        spawn_metrics(reported, config.metrics.interval_secs.max(1));
    }

    info!("🌐 feeds started");

    let deadline = async {
        match timeout_seconds {
            Some(timeout) => tokio::time::sleep(Duration::from_secs(timeout)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("🛑 shutdown signal received, cleaning up..."),
            Err(e) => error!("❌ failed to listen for Ctrl+C: {}", e),
        },
        _ = deadline => {
            info!("⏰ {}s timer expired, shutting down", timeout_seconds.unwrap_or_default());
        }
    }

    if let Some(feed) = quote {
        if !matches!(feed.health(), PriceHealth::Live) {
            warn!("⚠️ quote price at shutdown: {:?}", feed.health());
        }
        feed.shutdown().await;
    }
    if let Some(feed) = notification {
        feed.shutdown().await;
    }

    info!("✅ gold-feed stopped");
    Ok(())
}

fn spawn_status_watcher(mut status: watch::Receiver<ConnectionStatus>) {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            if current.is_terminated() {
                error!("💀 {} (call connect to retry)", current);
            } else {
                debug!("📶 {}", current);
            }
        }
    });
}

/// 피드별 프레임 속도와 프로세스 CPU 로깅
fn spawn_metrics(feeds: Vec<(FeedKind, Arc<FeedStats>)>, interval_secs: u64) {
    tokio::spawn(async move {
        use sysinfo::{Pid, ProcessRefreshKind, System};
        use tokio::time::sleep;

        let pid = std::process::id();
        let mut sys = System::new();
        let mut prev_frames = vec![0u64; feeds.len()];
        loop {
            sleep(Duration::from_secs(interval_secs)).await;
            sys.refresh_processes_specifics(ProcessRefreshKind::everything());
            let cpu_percent = sys.process(Pid::from_u32(pid)).map(|p| p.cpu_usage()).unwrap_or(0.0);

            for ((kind, stats), prev) in feeds.iter().zip(prev_frames.iter_mut()) {
                let snap = stats.snapshot();
                let fps = snap.frames_received.saturating_sub(*prev) as f64 / interval_secs as f64;
                *prev = snap.frames_received;
                info!(
                    "📈 {} metrics: cpu={:.1}% fps={:.1} avg_frame={:.1}B dispatched={} heartbeats={} dropped={} handler_failures={} reconnects={} ({}s)",
                    kind,
                    cpu_percent,
                    fps,
                    snap.average_frame_size(),
                    snap.frames_dispatched,
                    snap.heartbeats,
                    snap.frames_dropped,
                    snap.handler_failures,
                    snap.reconnects_scheduled,
                    interval_secs
                );
            }
        }
    });
}

/// 첫 번째 인수에서 실행 시간(초)을 읽음 (선택)
/// 사용법: gold-feed [timeout_seconds]
fn parse_timeout_arg() -> Option<u64> {
    let arg = std::env::args().nth(1)?;
    match arg.parse::<u64>() {
        Ok(seconds) if seconds > 0 => Some(seconds),
        Ok(_) => {
            eprintln!("⚠️ timeout must be greater than 0, running until Ctrl+C");
            None
        }
        Err(_) => {
            eprintln!("⚠️ invalid timeout '{}', running until Ctrl+C", arg);
            None
        }
    }
}
