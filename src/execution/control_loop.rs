use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::api::Exchange;
use crate::config::{LoopSettings, StoreSettings};
use crate::execution::reconciler::{ReconcileOutcome, Reconciler};
use crate::execution::trading_model::{TickOutcome, TradingModel};
use crate::models::PriceObservation;
use crate::persistence::PriceSink;

/// Where live prices are recorded, and how long they are kept
pub struct Recorder {
    pub sink: Arc<dyn PriceSink>,
    pub instrument: String,
    pub keep_hours: u64,
}

impl Recorder {
    pub fn new(sink: Arc<dyn PriceSink>, store: &StoreSettings) -> Self {
        Self {
            sink,
            instrument: store.instrument.clone(),
            keep_hours: store.keep_hours,
        }
    }
}

/// Result of one loop step
#[derive(Debug, Clone)]
pub struct StepReport {
    /// `None` when the price could not be fetched
    pub observation: Option<PriceObservation>,
    pub outcome: Option<TickOutcome>,
    pub reconcile: Option<ReconcileOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub ticks: u64,
    pub decisions: u64,
    pub orders: u64,
    pub failures: u64,
}

/// Sequential tick loop around one TradingModel
///
/// Each step runs to completion before the next starts; shutdown is only
/// observed while waiting for the next tick.
pub struct ControlLoop {
    model: TradingModel,
    exchange: Arc<dyn Exchange>,
    reconciler: Reconciler,
    recorder: Option<Recorder>,
    settings: LoopSettings,
    steps: u64,
}

impl ControlLoop {
    pub fn new(
        model: TradingModel,
        exchange: Arc<dyn Exchange>,
        reconciler: Reconciler,
        settings: LoopSettings,
    ) -> Self {
        Self {
            model,
            exchange,
            reconciler,
            recorder: None,
            settings,
            steps: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn model(&self) -> &TradingModel {
        &self.model
    }

    pub async fn step(&mut self) -> StepReport {
        self.step_at(Utc::now()).await
    }

    /// One tick: cancel resting orders, fetch price, decide, reconcile
    pub async fn step_at(&mut self, now: DateTime<Utc>) -> StepReport {
        self.steps += 1;

        if let Err(e) = self.exchange.cancel_all().await {
            tracing::warn!(
                event = "reconcile_failed",
                stage = "cancel_all",
                error = %e,
                "⚠️  Could not cancel resting orders"
            );
        }

        let price = match self.exchange.get_price().await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(
                    event = "price_fetch_failed",
                    exchange = self.exchange.name(),
                    error = %e,
                    "⚠️  Price fetch failed, skipping tick"
                );
                return StepReport {
                    observation: None,
                    outcome: None,
                    reconcile: None,
                };
            }
        };

        let observation = PriceObservation::new(now, price);
        self.record(&observation).await;

        let outcome = self.model.tick(observation).await;
        let target = self.model.target_exposure();

        let reconcile = match self.reconciler.reconcile(self.exchange.as_ref(), target).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(
                    event = "reconcile_failed",
                    stage = "order",
                    target,
                    error = %e,
                    "⚠️  Reconciliation failed, retrying next tick"
                );
                None
            }
        };

        StepReport {
            observation: Some(observation),
            outcome: Some(outcome),
            reconcile,
        }
    }

    async fn record(&self, observation: &PriceObservation) {
        let Some(recorder) = &self.recorder else {
            return;
        };

        if let Err(e) = recorder.sink.record(&recorder.instrument, observation).await {
            tracing::warn!(
                event = "price_record_failed",
                error = %e,
                "⚠️  Failed to record price"
            );
        }

        let per_hour = (3600 / self.settings.tick_interval_secs.max(1)).max(1);
        if self.steps % per_hour == 0 {
            match recorder.sink.prune(&recorder.instrument, recorder.keep_hours).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!("🧹 Pruned {} prices older than {}h", removed, recorder.keep_hours)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    event = "price_record_failed",
                    stage = "prune",
                    error = %e,
                    "⚠️  Failed to prune old prices"
                ),
            }
        }
    }

    /// Run until shutdown is signalled or `max_ticks` steps have run
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>, max_ticks: Option<u64>) -> RunStats {
        let period = self.settings.tick_interval();
        let start = if self.settings.align_to_minute {
            next_boundary(Utc::now(), self.settings.tick_interval_secs)
        } else {
            Instant::now()
        };

        tracing::info!(
            "🔄 Control loop starting in {:?} (every {:?})",
            start.saturating_duration_since(Instant::now()),
            period
        );

        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stats = RunStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }
            if max_ticks.is_some_and(|max| stats.ticks >= max) {
                tracing::info!("Reached {} ticks, stopping", stats.ticks);
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    // A dropped sender also means stop
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.step().await;
            stats.ticks += 1;

            match &report.observation {
                None => stats.failures += 1,
                Some(_) if report.reconcile.is_none() => stats.failures += 1,
                Some(_) => {}
            }
            if report.outcome.as_ref().and_then(|o| o.decision()).is_some() {
                stats.decisions += 1;
            }
            if report.reconcile.as_ref().is_some_and(|r| r.order_id.is_some()) {
                stats.orders += 1;
            }
        }

        tracing::info!(
            ticks = stats.ticks,
            decisions = stats.decisions,
            orders = stats.orders,
            failures = stats.failures,
            "👋 Control loop stopped"
        );
        stats
    }
}

/// Instant of the next wall-clock multiple of `interval_secs` (minute-aligned for 60)
fn next_boundary(now: DateTime<Utc>, interval_secs: u64) -> Instant {
    let interval = interval_secs.max(1);
    let seconds_of_day = now.num_seconds_from_midnight() as u64;
    let into_period = seconds_of_day % interval;

    let wait = if into_period == 0 && now.nanosecond() == 0 {
        0
    } else {
        interval - into_period
    };

    Instant::now() + Duration::from_secs(wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ExchangeError, PaperExchange};
    use crate::config::{MissingModelPolicy, Settings};
    use crate::models::{ExchangePosition, OrderSide};
    use crate::prediction::PredictionSource;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::Mutex;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.model.k = 3;
        settings.model.p = 2;
        settings.model.model_path = None;
        settings.model.on_missing_model = MissingModelPolicy::NoSignal;
        settings.control.tick_interval_secs = 1;
        settings.control.align_to_minute = false;
        settings
    }

    fn control_loop(exchange: Arc<dyn Exchange>) -> ControlLoop {
        let settings = settings();
        let model = TradingModel::new(&settings, PredictionSource::Unavailable);
        ControlLoop::new(model, exchange, Reconciler::new(0.001), settings.control)
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minute)
    }

    /// Records the order in which exchange calls arrive
    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<&'static str>>,
        fail_price: bool,
    }

    #[async_trait]
    impl Exchange for CallLog {
        async fn get_price(&self) -> Result<f64, ExchangeError> {
            self.calls.lock().unwrap().push("get_price");
            if self.fail_price {
                return Err(ExchangeError::Decode("boom".into()));
            }
            Ok(100.0)
        }

        async fn get_position(&self) -> Result<ExchangePosition, ExchangeError> {
            self.calls.lock().unwrap().push("get_position");
            Ok(ExchangePosition::from_signed(0.002))
        }

        async fn cancel_all(&self) -> Result<(), ExchangeError> {
            self.calls.lock().unwrap().push("cancel_all");
            Ok(())
        }

        async fn make_order(&self, _side: OrderSide, _size: f64) -> Result<Option<String>, ExchangeError> {
            self.calls.lock().unwrap().push("make_order");
            Ok(Some("id".into()))
        }

        fn name(&self) -> &str {
            "call-log"
        }
    }

    #[tokio::test]
    async fn test_step_call_order() {
        let exchange = Arc::new(CallLog::default());
        let mut control = control_loop(exchange.clone());

        let report = control.step_at(at(0)).await;
        assert!(report.observation.is_some());
        assert!(matches!(report.outcome, Some(TickOutcome::Warming { .. })));

        // Flat target against a 0.002 long means one sell
        assert_eq!(
            *exchange.calls.lock().unwrap(),
            vec!["cancel_all", "get_price", "get_position", "make_order"]
        );
    }

    #[tokio::test]
    async fn test_price_failure_skips_tick_without_touching_history() {
        let exchange = Arc::new(CallLog {
            fail_price: true,
            ..Default::default()
        });
        let mut control = control_loop(exchange.clone());

        let report = control.step_at(at(0)).await;
        assert!(report.observation.is_none());
        assert!(control.model().history().is_empty());
        assert_eq!(*exchange.calls.lock().unwrap(), vec!["cancel_all", "get_price"]);
    }

    #[tokio::test]
    async fn test_run_stops_after_max_ticks() {
        let exchange = Arc::new(PaperExchange::new());
        exchange.set_price(100.0);
        let mut control = control_loop(exchange);

        let (_tx, rx) = watch::channel(false);
        let stats = control.run(rx, Some(2)).await;
        assert_eq!(stats.ticks, 2);
        assert_eq!(control.model().history().len(), 2);
    }

    #[tokio::test]
    async fn test_run_honours_shutdown() {
        let exchange = Arc::new(PaperExchange::new());
        exchange.set_price(100.0);
        let mut control = control_loop(exchange);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let stats = control.run(rx, None).await;
        assert_eq!(stats.ticks, 0);
    }

    #[derive(Default)]
    struct MemorySink {
        recorded: Mutex<Vec<PriceObservation>>,
    }

    #[async_trait]
    impl PriceSink for MemorySink {
        async fn record(&self, _instrument: &str, observation: &PriceObservation) -> crate::Result<()> {
            self.recorded.lock().unwrap().push(*observation);
            Ok(())
        }

        async fn prune(&self, _instrument: &str, _keep_hours: u64) -> crate::Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_prices_are_recorded() {
        let exchange = Arc::new(PaperExchange::new());
        exchange.set_price(100.0);
        let sink = Arc::new(MemorySink::default());
        let mut control = control_loop(exchange)
            .with_recorder(Recorder::new(sink.clone(), &StoreSettings::default()));

        control.step_at(at(0)).await;
        control.step_at(at(1)).await;
        assert_eq!(sink.recorded.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_next_boundary_is_within_one_interval() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 42).unwrap();
        let before = Instant::now();
        let boundary = next_boundary(now, 60);
        let wait = boundary.duration_since(before);
        assert!(wait >= Duration::from_secs(18) && wait < Duration::from_secs(19));
    }
}
