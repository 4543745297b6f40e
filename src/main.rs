//! Tradeloop - strategy execution engine
//!
//! Commands:
//! - `tradeloop [live]`: poll the market gateway and trade until Ctrl-C
//! - `tradeloop backtest <bars.json>`: batch run + validation replay over a
//!   JSON array of bar rows, printing both results and their comparison

use anyhow::Context;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use tradeloop::compare::compare;
use tradeloop::strategy::parse_bar_rows;
use tradeloop::{
    AppConfig, BacktestRunner, ExecutionMode, HttpExchangeClient, LiveEngine, LiveSettings,
    LogNotifier, MarketData, OrderGateway, StrategyRegistry, TradeNotifier, ValidationRunner,
    WebhookNotifier,
};

/// Final-capital tolerance for the batch/replay comparison, in percent
const CONSISTENCY_TOLERANCE_PCT: i64 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(None)?;

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("live") => run_live(config).await,
        Some("backtest") => {
            let path = args
                .get(1)
                .context("usage: tradeloop backtest <bars.json>")?;
            run_backtest(&config, Path::new(path))
        }
        Some(other) => Err(anyhow::anyhow!(
            "unknown command '{}' (expected 'live' or 'backtest')",
            other
        )),
    }
}

async fn run_live(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting Tradeloop...");
    info!(
        "Strategy: {} | Gateway: {} | Mode: {}",
        config.strategy.name, config.live.exchange_url, config.live.mode
    );

    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.create(&config.strategy.name, &config.strategy.params)?;

    let client = Arc::new(HttpExchangeClient::new(&config.live.exchange_url)?);
    let market: Arc<dyn MarketData> = client.clone();
    let gateway: Option<Arc<dyn OrderGateway>> = match config.live.mode {
        ExecutionMode::Live => Some(client),
        _ => None,
    };

    let mut notifiers: Vec<Arc<dyn TradeNotifier>> = vec![Arc::new(LogNotifier)];
    if let Some(url) = &config.live.webhook_url {
        notifiers.push(Arc::new(WebhookNotifier::new(url, config.live.io_timeout())?));
    }

    let settings = LiveSettings::from_config(&config.engine, &config.live)?;
    let handle = LiveEngine::start(strategy, market, gateway, notifiers, settings)?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, finishing current iteration...");

    let session = handle.stop().await?;
    if let Some(e) = &session.status.last_error {
        error!("Last error: {}", e);
    }
    println!("{}", serde_json::to_string_pretty(&session.summary)?);
    Ok(())
}

fn run_backtest(config: &AppConfig, path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let rows: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
    let bars = parse_bar_rows(&rows)?;

    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.create(&config.strategy.name, &config.strategy.params)?;
    let runner_config = config
        .engine
        .backtest_config(&config.live.symbol, config.live.timeframe)?;

    let mut progress = |done: usize, total: usize| info!("Progress: {}/{} bars", done, total);
    let batch = BacktestRunner::new(strategy.as_ref(), runner_config.clone())
        .run(&bars, Some(&mut progress))?;
    let replay = ValidationRunner::new(strategy.as_ref(), runner_config)
        .run(&bars, Some(&mut progress))?;

    let comparison = compare(
        &batch,
        &replay.result,
        Decimal::from(CONSISTENCY_TOLERANCE_PCT),
    );
    if !comparison.matched {
        error!(
            "Batch and replay disagree: return diff {}%, trades diff {}, capital diff {}%",
            comparison.return_diff_pct.round_dp(4),
            comparison.trades_diff,
            comparison.capital_diff_pct.round_dp(4)
        );
    }

    let output = serde_json::json!({
        "batch": {
            "summary": batch.summary(),
            "initial_capital": batch.initial_capital,
            "final_capital": batch.final_capital,
            "total_return_pct": batch.total_return_pct(),
            "bars_processed": batch.bars_processed,
        },
        "replay": {
            "summary": replay.result.summary(),
            "final_capital": replay.result.final_capital,
            "total_return_pct": replay.result.total_return_pct(),
            "signals": replay.signals.len(),
        },
        "comparison": comparison,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
