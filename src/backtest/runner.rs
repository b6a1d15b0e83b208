use std::sync::Arc;

use async_trait::async_trait;

use crate::api::PaperExchange;
use crate::backfill::{BootstrapInitializer, HistoricalSource};
use crate::backtest::metrics::ReplayMetrics;
use crate::config::Settings;
use crate::execution::{ControlLoop, Reconciler, TickOutcome, TradingModel};
use crate::models::PriceObservation;
use crate::prediction::PredictionSource;
use crate::Result;

/// Historical source backed by a fixed in-memory series
///
/// `fetch_recent` returns the observations within `minutes` of the newest one.
pub struct ReplaySource {
    observations: Vec<PriceObservation>,
}

impl ReplaySource {
    pub fn new(observations: Vec<PriceObservation>) -> Self {
        Self { observations }
    }
}

#[async_trait]
impl HistoricalSource for ReplaySource {
    async fn fetch_recent(&self, _instrument: &str, minutes: u32) -> Result<Vec<PriceObservation>> {
        let Some(newest) = self.observations.last() else {
            return Ok(Vec::new());
        };
        let cutoff = newest.timestamp - chrono::Duration::minutes(minutes as i64);

        Ok(self
            .observations
            .iter()
            .filter(|o| o.timestamp > cutoff)
            .copied()
            .collect())
    }
}

/// Drives the full engine over a price series against a paper exchange
pub struct ReplayRunner {
    settings: Settings,
}

impl ReplayRunner {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Replay `prices`
    ///
    /// With `warm_start`, the first `k + warmup` prices are served through
    /// bootstrap as history and only the rest are ticked live.
    pub async fn run(
        &self,
        source: PredictionSource,
        prices: &[PriceObservation],
        warm_start: bool,
    ) -> Result<ReplayMetrics> {
        let model_settings = &self.settings.model;
        let mut model = TradingModel::new(&self.settings, source);
        let mut metrics = ReplayMetrics::default();

        let live = if warm_start {
            let warmup = model_settings.indicators.warmup_len();
            let split = (model_settings.k + warmup).min(prices.len());
            let (history, live) = prices.split_at(split);

            let now = history
                .last()
                .map(|o| o.timestamp)
                .ok_or("no prices to replay")?;
            let initializer = BootstrapInitializer::new(
                Some(Arc::new(ReplaySource::new(history.to_vec()))),
                self.settings.store.instrument.clone(),
                self.settings.bootstrap.clone(),
                warmup,
            );
            metrics.seeded = initializer
                .initialize_at(model.history_mut(), now)
                .await
                .is_seeded();
            live
        } else {
            prices
        };

        let exchange = Arc::new(PaperExchange::new());
        let mut control = ControlLoop::new(
            model,
            exchange.clone(),
            Reconciler::new(self.settings.exchange.min_order_size),
            self.settings.control.clone(),
        );

        for observation in live {
            exchange.set_price(observation.price);
            let report = control.step_at(observation.timestamp).await;
            metrics.ticks += 1;

            match report.outcome {
                Some(TickOutcome::Warming { .. }) => metrics.warming_ticks += 1,
                Some(TickOutcome::Decided(tick)) => {
                    if tick.up_probability.is_none() {
                        metrics.prediction_failures += 1;
                    }
                    metrics.record_action(tick.decision.action);
                }
                Some(TickOutcome::Rejected(_)) | None => {}
            }
            if report.reconcile.is_some_and(|r| r.order_id.is_some()) {
                metrics.orders += 1;
            }
        }

        metrics.realized_pnl = exchange.realized_pnl();
        metrics.unrealized_pnl = exchange.unrealized_pnl();
        metrics.final_exposure = exchange.net_position();

        tracing::info!(
            ticks = metrics.ticks,
            decisions = metrics.decisions,
            orders = metrics.orders,
            pnl = metrics.total_pnl(),
            "📊 Replay finished"
        );

        Ok(metrics)
    }
}
