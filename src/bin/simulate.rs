use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use fxtrader::backtest::{MarketScenario, ReplayRunner, SyntheticPriceGenerator};
use fxtrader::config::{MissingModelPolicy, Settings};
use fxtrader::prediction::{LinearBackend, LinearWeights, PredictionSource, TechnicalModel, FEATURE_DIM};
use std::path::PathBuf;
use std::sync::Arc;

/// Replay the trading engine over synthetic prices against a paper exchange
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "fxtrader.toml")]
    config: PathBuf,

    /// uptrend | downtrend | sideways | volatile | regimes
    #[arg(long, default_value = "regimes")]
    scenario: MarketScenario,

    /// Minutes of synthetic prices
    #[arg(long, default_value_t = 2880)]
    minutes: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Starting price of the synthetic series (JPY)
    #[arg(long, default_value_t = 10_000_000.0)]
    base_price: f64,

    /// Start with an empty history instead of bootstrapping
    #[arg(long)]
    cold_start: bool,

    /// Use a built-in momentum model when no model file is available
    #[arg(long)]
    demo_model: bool,

    /// Print metrics as JSON
    #[arg(long)]
    json: bool,
}

/// Linear weights that follow short-term momentum on the newest row
fn momentum_weights(k: usize) -> LinearWeights {
    let mut weights = vec![vec![[0.0, 0.0]; FEATURE_DIM]; k];
    if let Some(last) = weights.last_mut() {
        // SMA short - mid
        last[1] = [-2.0, 2.0];
        // MACD histogram
        last[10] = [-4.0, 4.0];
    }
    LinearWeights {
        k,
        weights,
        bias: [0.0, 0.0],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fxtrader=warn,simulate=info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(Some(args.config.as_path())).context("invalid settings")?;
    if args.demo_model {
        settings.model.on_missing_model = MissingModelPolicy::NoSignal;
    }

    let mut source = PredictionSource::from_settings(&settings.model).context("prediction model")?;
    if args.demo_model && !source.is_available() {
        let backend = LinearBackend::new(momentum_weights(settings.model.k)).context("demo model")?;
        source = PredictionSource::TechnicalModel(TechnicalModel::new(
            Arc::new(backend),
            settings.model.indicators.clone(),
            1,
        ));
    }

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              FXTRADER REPLAY                          ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    println!(
        "Scenario: {:?}, {} minutes, seed {}, model {}",
        args.scenario,
        args.minutes,
        args.seed,
        source.name()
    );

    let prices = SyntheticPriceGenerator::new(args.seed)
        .with_base_price(args.base_price)
        .generate(args.scenario, args.minutes, Utc::now());

    let metrics = ReplayRunner::new(settings)
        .run(source, &prices, !args.cold_start)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        metrics.print_summary();
    }

    Ok(())
}
