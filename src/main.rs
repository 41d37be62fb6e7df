//! Divergence Hedger - Main Entry Point
//!
//! Paper trading against live public order books: both venues are simulated
//! by [`MockVenue`] fed from the Nobitex and CoinEx public depth endpoints.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use divergence_hedger::config::{AssetConfig, Config};
use divergence_hedger::exchange::{
    BookFormat, MockVenue, PaperSpotVenue, PublicBookClient, TradingVenue,
};
use divergence_hedger::persistence::{JsonPositionCache, PositionStore, TradeJournal};
use divergence_hedger::signal::{
    BurstConfig, ObservationRecorder, ObservationStore, PriceSignal, SignalMarkets,
    SqliteObservationStore, StatsEstimator,
};
use divergence_hedger::strategy::{ControlLoop, ControlSettings, HedgeRole};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Divergence Hedger CLI
#[derive(Parser)]
#[command(name = "divergence-hedger")]
#[command(version, about = "Cross-venue divergence hedging of a spot inventory")]
struct Cli {
    /// Configuration file (without extension)
    #[arg(short, long, global = true, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop for one asset
    Run {
        /// Asset section to trade (e.g. BTC)
        #[arg(short, long)]
        asset: String,

        /// Which leg this instance drives
        #[arg(short, long, value_enum, default_value = "hedger")]
        role: Role,
    },

    /// Record live divergence observations for the rolling statistics
    Observe {
        /// Asset section to observe (e.g. BTC)
        #[arg(short, long)]
        asset: String,

        /// Seconds between observations
        #[arg(short, long, default_value = "5")]
        interval_secs: u64,
    },

    /// Show cached positions and recent trades
    Status {
        /// Number of recent trades to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Hedger,
    Maker,
}

impl From<Role> for HedgeRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Hedger => HedgeRole::Hedger,
            Role::Maker => HedgeRole::Maker,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Commands::Run { asset, role } => run_control(&config, &asset, role.into()).await,
        Commands::Observe {
            asset,
            interval_secs,
        } => run_observer(&config, &asset, interval_secs).await,
        Commands::Status { limit } => show_status(&config, limit),
    }
}

/// Run the hedger or maker loop until Ctrl-C.
async fn run_control(config: &Config, asset_name: &str, role: HedgeRole) -> Result<()> {
    let asset = config.asset(asset_name)?;
    log_config(config, asset_name, asset, role);

    let positions = Arc::new(JsonPositionCache::new(&config.storage.position_cache_path));
    let (spot, derivatives) = paper_venues(config, asset, positions.clone()).await?;
    let signal = Arc::new(PriceSignal::new(
        spot.clone(),
        derivatives.clone(),
        markets(asset),
    ));

    let store: Option<Arc<dyn ObservationStore>> =
        match SqliteObservationStore::open(&config.storage.obs_db_path) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Observation store unavailable, statistics from live bursts");
                None
            }
        };
    let estimator = StatsEstimator::new(
        store,
        BurstConfig {
            samples: config.signal.burst_samples,
            delay: Duration::from_millis(config.signal.burst_delay_ms),
        },
    );

    let settings = ControlSettings::from_config(asset, &config.execution);
    let mut control = ControlLoop::new(
        role,
        settings,
        spot,
        derivatives,
        signal,
        estimator,
        positions,
    );
    match TradeJournal::open(
        &config.storage.trades_db_path,
        config.storage.trade_flush_batch,
    ) {
        Ok(journal) => control = control.with_journal(journal),
        Err(e) => warn!(error = %e, "Trade journal unavailable, trades will not be recorded"),
    }

    control.prepare().await;
    control.run(shutdown_flag()).await;
    Ok(())
}

/// Append live divergence samples to the observation store until Ctrl-C.
async fn run_observer(config: &Config, asset_name: &str, interval_secs: u64) -> Result<()> {
    let asset = config.asset(asset_name)?;
    let positions = Arc::new(JsonPositionCache::new(&config.storage.position_cache_path));
    let (spot, derivatives) = paper_venues(config, asset, positions).await?;
    let signal = Arc::new(PriceSignal::new(spot, derivatives, markets(asset)));

    let store = SqliteObservationStore::open(&config.storage.obs_db_path).with_context(|| {
        format!(
            "Failed to open observation store at {}",
            config.storage.obs_db_path
        )
    })?;

    info!(asset = %asset_name, db = %config.storage.obs_db_path, "Recording observations");
    let recorder = ObservationRecorder::new(
        signal,
        Arc::new(store),
        Duration::from_secs(interval_secs.max(1)),
    );
    recorder.run(shutdown_flag()).await;
    Ok(())
}

fn markets(asset: &AssetConfig) -> SignalMarkets {
    SignalMarkets {
        spot_market: asset.spot_market.clone(),
        derivatives_market: asset.derivatives_market.clone(),
        fiat_rate_market: asset.fiat_rate_market.clone(),
    }
}

/// Simulated venues fed by public books.
///
/// The spot holding and the hedge position both come from the shared cache, so
/// a hedger and a maker process see each other's fills.
async fn paper_venues(
    config: &Config,
    asset: &AssetConfig,
    positions: Arc<dyn PositionStore>,
) -> Result<(Arc<dyn TradingVenue>, Arc<MockVenue>)> {
    let spot_feed = PublicBookClient::new(&config.venues.spot_book_url, BookFormat::Nobitex)?;
    let derivatives_feed = PublicBookClient::new(
        &config.venues.derivatives_book_url,
        BookFormat::CoinexFutures,
    )?;

    let spot_book = Arc::new(MockVenue::new("nobitex").with_feed(Arc::new(spot_feed)));
    let spot: Arc<dyn TradingVenue> = Arc::new(PaperSpotVenue::new(
        spot_book,
        positions.clone(),
        &asset.spot_market,
        asset.base_asset(),
        config.paper.spot_inventory,
    ));

    let derivatives =
        Arc::new(MockVenue::new("coinex").with_feed(Arc::new(derivatives_feed)));
    derivatives
        .set_position_endpoint(config.paper.derivatives_position_endpoint)
        .await;
    if let Ok(Some(entry)) = positions.read(&asset.derivatives_market) {
        derivatives
            .set_position(&asset.derivatives_market, entry.quantity)
            .await;
    }

    let held = spot.get_balance(asset.base_asset()).await?;
    let hedge = derivatives.position(&asset.derivatives_market).await;
    info!(spot_held = %held, derivatives_position = %hedge, "Paper venues ready");
    Ok((spot, derivatives))
}

/// Flag set once Ctrl-C is received.
fn shutdown_flag() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received, finishing current cycle");
        shutdown_clone.store(true, Ordering::SeqCst);
    });
    shutdown
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "divergence-hedger.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("divergence_hedger=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config, name: &str, asset: &AssetConfig, role: HedgeRole) {
    info!("📋 Configuration ({} as {}):", name, role);
    info!(
        "   Markets: {} / {} via {}",
        asset.spot_market, asset.derivatives_market, asset.fiat_rate_market
    );
    info!(
        "   Inventory: [{}, {}] ± {}",
        asset.lower_units, asset.upper_units, asset.tolerance_units
    );
    info!("   Band: {} min window, k = {}", asset.window_minutes, asset.k);
    info!(
        "   Maker: qty {} | w_buy {} | w_sell {} | timeout {}s",
        asset.order_quantity, asset.w_buy, asset.w_sell, config.execution.maker_timeout_secs
    );
    info!(
        "   Taker: precision {}/{} | leverage {}x | min qty {}",
        asset.qty_precision, asset.price_precision, asset.leverage, asset.min_qty
    );
    info!("   Loop interval: {}ms", config.execution.interval_ms);
}

/// Print cached positions and recent journaled trades.
fn show_status(config: &Config, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                DIVERGENCE HEDGER STATUS                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let cache = JsonPositionCache::new(&config.storage.position_cache_path);
    let entries = cache
        .entries()
        .with_context(|| format!("Failed to read {:?}", cache.path()))?;

    if entries.is_empty() {
        println!("\n❌ No cached positions in {:?}", cache.path());
    } else {
        println!("\n📊 Positions");
        for (symbol, entry) in &entries {
            println!(
                "   ├─ {:<10} {:>14} {:<6} {}",
                symbol,
                entry.quantity,
                format!("{:?}", entry.side).to_lowercase(),
                entry.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    if !Path::new(&config.storage.trades_db_path).exists() {
        println!("\n❌ Trade journal not found: {}", config.storage.trades_db_path);
        return Ok(());
    }

    let journal = TradeJournal::open(&config.storage.trades_db_path, 1)?;
    let trades = journal.recent(limit)?;
    println!("\n📈 Recent Trades ({})", trades.len());
    for trade in &trades {
        println!(
            "   ├─ {} {:<8} {:<4} {:<5} {} @ {} [{}]",
            trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
            trade.symbol,
            trade.side,
            trade.role.as_str(),
            trade.quantity,
            trade.price,
            trade.outcome
        );
    }

    Ok(())
}
