use anyhow::Context;
use clap::{Parser, Subcommand};
use fxtrader::api::{BitflyerClient, Exchange, PaperExchange};
use fxtrader::backfill::{BootstrapInitializer, HistoricalSource};
use fxtrader::config::Settings;
use fxtrader::execution::{ControlLoop, Reconciler, Recorder, TradingModel};
use fxtrader::persistence::RedisPriceStore;
use fxtrader::prediction::PredictionSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Horizon-based FX_BTC_JPY trader", long_about = None)]
struct Cli {
    /// TOML settings file; missing file means defaults + environment
    #[arg(long, global = true, default_value = "fxtrader.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading loop
    Run {
        /// Trade against a paper exchange fed by live prices
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many ticks
        #[arg(long)]
        max_ticks: Option<u64>,
    },
    /// Load and validate settings and the model, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run {
        dry_run: false,
        max_ticks: None,
    }) {
        Command::Run { dry_run, max_ticks } => run(&cli.config, dry_run, max_ticks).await,
        Command::CheckConfig => check_config(&cli.config),
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fxtrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let settings = Settings::load(Some(path)).context("invalid settings")?;
    let source = PredictionSource::from_settings(&settings.model).context("prediction model")?;

    tracing::info!("✅ Settings OK");
    tracing::info!("  k={} p={} margin={}", settings.model.k, settings.model.p, settings.model.margin);
    tracing::info!("  model: {}", source.name());
    tracing::info!(
        "  sizing: base={} min={} max={} floor={}",
        settings.sizing.base_size,
        settings.sizing.min_size,
        settings.sizing.max_size,
        settings.sizing.risk_floor
    );
    tracing::info!("  product: {} (dry_run={})", settings.exchange.product_code, settings.exchange.dry_run);
    Ok(())
}

async fn run(path: &Path, dry_run: bool, max_ticks: Option<u64>) -> anyhow::Result<()> {
    let mut settings = Settings::load(Some(path)).context("invalid settings")?;
    if dry_run {
        settings.exchange.dry_run = true;
    }

    tracing::info!("🚀 fxtrader starting");

    // Configuration problems are fatal here and nowhere else
    let source = PredictionSource::from_settings(&settings.model).context("prediction model")?;

    let client = BitflyerClient::new(
        &settings.exchange,
        std::env::var("BITFLYER_API_KEY").ok(),
        std::env::var("BITFLYER_API_SECRET").ok(),
    )
    .context("exchange client")?;

    let exchange: Arc<dyn Exchange> = if settings.exchange.dry_run {
        tracing::info!("📝 Dry run: orders go to the paper exchange");
        Arc::new(PaperExchange::with_price_feed(Arc::new(client)))
    } else {
        if !client.has_credentials() {
            anyhow::bail!("BITFLYER_API_KEY and BITFLYER_API_SECRET are required for live trading");
        }
        Arc::new(client)
    };

    let store = connect_store(&settings).await;

    let mut model = TradingModel::new(&settings, source);
    let historical = store
        .clone()
        .map(|s| Arc::new(s) as Arc<dyn HistoricalSource>);
    let outcome = BootstrapInitializer::new(
        historical,
        settings.store.instrument.clone(),
        settings.bootstrap.clone(),
        settings.model.indicators.warmup_len(),
    )
    .initialize(model.history_mut())
    .await;

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Product: {}", settings.exchange.product_code);
    tracing::info!("  Model: {} (k={}, p={})", model.source().name(), settings.model.k, settings.model.p);
    tracing::info!("  History: {}/{} ({:?})", model.history().len(), settings.model.k, outcome);

    let mut control = ControlLoop::new(
        model,
        exchange,
        Reconciler::new(settings.exchange.min_order_size),
        settings.control.clone(),
    );
    if settings.store.record_prices {
        if let Some(store) = store {
            control = control.with_recorder(Recorder::new(Arc::new(store), &settings.store));
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("\n⚠️  Received Ctrl+C, finishing current tick...");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!("\nPress Ctrl+C to stop...\n");
    control.run(shutdown_rx, max_ticks).await;

    tracing::info!("👋 fxtrader stopped");
    Ok(())
}

/// Redis is optional: without it bootstrap falls back and prices go unrecorded
async fn connect_store(settings: &Settings) -> Option<RedisPriceStore> {
    let url = settings.store.redis_url.as_deref()?;
    match RedisPriceStore::new(url).await {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(
                event = "bootstrap_fallback",
                error = %e,
                "⚠️  Redis unavailable, continuing without price store"
            );
            None
        }
    }
}
