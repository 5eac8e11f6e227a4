//! 오프라인 프레임 검사 도구.
//!
//! 파일이나 stdin에서 원본 피드 프레임(한 줄에 JSON 텍스트 하나)을 읽어
//! 정규화와 가격 추출 결과를 출력.
//!
//! 사용법: frame-inspect [--notification] [FILE]

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use gold_feed::config::Config;
use gold_feed::normalizer::MessageNormalizer;
use gold_feed::pricing::{PriceTracker, QuoteBoard};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut notification = false;
    let mut path = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--notification" | "-n" => notification = true,
            "--help" | "-h" => {
                println!("usage: frame-inspect [--notification] [FILE]");
                return Ok(());
            }
            _ => path = Some(arg),
        }
    }

    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("config not usable ({}), using defaults", e);
        Config::default()
    });

    let normalizer = if notification {
        MessageNormalizer::notification(config.envelope.clone())
    } else {
        MessageNormalizer::quote(config.envelope.clone())
    };
    eprintln!("🔧 unwrap steps: {:?}", normalizer.steps());
    let tracker = PriceTracker::new(config.quote.preferred_instruments.as_slice());

    let reader: Box<dyn BufRead> = match &path {
        Some(p) => Box::new(BufReader::new(File::open(p).with_context(|| format!("cannot open {}", p))?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut totals = (0usize, 0usize, 0usize); // 메시지, heartbeat, 버림
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read input")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let n = index + 1;

        match normalizer.normalize(line) {
            Err(e) => {
                totals.2 += 1;
                println!("#{:<4} ❌ dropped: {}", n, e);
            }
            Ok(None) => {
                totals.1 += 1;
                println!("#{:<4} 💓 heartbeat", n);
            }
            Ok(Some(message)) => {
                totals.0 += 1;
                println!("#{:<4} 📨 {}", n, message);
                if notification {
                    continue;
                }

                let board = QuoteBoard::from_message(&message);
                for (code, quote) in &board.instruments {
                    println!("      {:<10} buy={:>10.2} sell={:>10.2}", code, quote.buy_price, quote.sell_price);
                }
                if tracker.update_at(&message, Utc::now()) {
                    let state = tracker.snapshot();
                    println!(
                        "      price: {} from {} change={:+.2} ({:+.3}%) {:?}",
                        state.price_display(),
                        state.source.as_deref().unwrap_or("-"),
                        state.change,
                        state.change_percent,
                        state.direction()
                    );
                } else {
                    println!("      price: no usable instrument");
                }
            }
        }
    }

    println!(
        "\n📊 {} messages, {} heartbeats, {} dropped",
        totals.0, totals.1, totals.2
    );
    Ok(())
}
