use std::time::Duration;

use crate::config::Settings;
use crate::execution::position_machine::{Decision, DecisionAction, PositionStateMachine, TickInput};
use crate::execution::price_history::{HistoryError, PriceHistory};
use crate::models::{Position, PriceObservation, Side};
use crate::prediction::{predicted_side, PredictionSource};
use crate::risk::RiskEstimator;

/// Everything that happened on one ready tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub observation: PriceObservation,
    pub up_probability: Option<f64>,
    pub predicted_side: Side,
    pub risk: Option<f64>,
    pub decision: Decision,
}

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// History below `k`; no decision made
    Warming { have: usize, need: usize },
    Decided(TickReport),
    /// Observation refused by the history; state untouched
    Rejected(HistoryError),
}

impl TickOutcome {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            TickOutcome::Decided(report) => Some(&report.decision),
            _ => None,
        }
    }
}

/// One instrument's complete decision state
///
/// Owns the price history and the position exclusively. Ticks take
/// `&mut self`, so a tick always completes before the next one starts.
pub struct TradingModel {
    history: PriceHistory,
    machine: PositionStateMachine,
    source: PredictionSource,
    risk: RiskEstimator,
    k: usize,
    margin: f64,
    inference_timeout: Duration,
}

impl TradingModel {
    pub fn new(settings: &Settings, source: PredictionSource) -> Self {
        let model = &settings.model;
        let retention = model.retention(settings.sizing.risk_lookback);

        Self {
            history: PriceHistory::new(model.k, retention),
            machine: PositionStateMachine::from_settings(model.p, &settings.sizing),
            source,
            risk: RiskEstimator::new(settings.sizing.risk_lookback),
            k: model.k,
            margin: model.margin,
            inference_timeout: model.inference_timeout(),
        }
    }

    pub fn history(&self) -> &PriceHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut PriceHistory {
        &mut self.history
    }

    pub fn position(&self) -> &Position {
        self.machine.position()
    }

    pub fn is_ready(&self) -> bool {
        self.history.is_ready()
    }

    pub fn target_exposure(&self) -> f64 {
        self.machine.position().exposure()
    }

    pub fn source(&self) -> &PredictionSource {
        &self.source
    }

    /// Append the observation and, once ready, run one decision
    pub async fn tick(&mut self, observation: PriceObservation) -> TickOutcome {
        if let Err(e) = self.history.append(observation) {
            tracing::warn!(
                event = "observation_rejected",
                error = %e,
                "⚠️  Price observation rejected"
            );
            return TickOutcome::Rejected(e);
        }

        if !self.history.is_ready() {
            tracing::info!(
                have = self.history.len(),
                need = self.k,
                "⏳ Warming up price history"
            );
            return TickOutcome::Warming {
                have: self.history.len(),
                need: self.k,
            };
        }

        let window = self.history.window(self.history.capacity());
        let up_probability = match self
            .source
            .predict_with_timeout(window, self.k, self.inference_timeout)
            .await
        {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!(
                    event = "prediction_unavailable",
                    source = self.source.name(),
                    error = %e,
                    "⚠️  Prediction unavailable, treating tick as no-signal"
                );
                None
            }
        };

        let side = up_probability.map_or(Side::Flat, |p| predicted_side(p, self.margin));

        let risk = match self.risk.estimate(&self.history.window(self.risk.lookback())) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(
                    event = "risk_unavailable",
                    error = %e,
                    "⚠️  Risk estimate unavailable, no new exposure this tick"
                );
                None
            }
        };

        if up_probability.is_some() && side.is_flat() {
            tracing::info!(event = "no_signal", "Model neutral this tick");
        }

        let decision = self.machine.transition(&TickInput {
            timestamp: observation.timestamp,
            price: observation.price,
            predicted_side: side,
            risk,
        });

        log_decision(&observation, up_probability, side, risk, &decision);

        TickOutcome::Decided(TickReport {
            observation,
            up_probability,
            predicted_side: side,
            risk,
            decision,
        })
    }
}

fn log_decision(
    observation: &PriceObservation,
    up_probability: Option<f64>,
    side: Side,
    risk: Option<f64>,
    decision: &Decision,
) {
    let icon = match decision.action {
        DecisionAction::Open => "🟢",
        DecisionAction::Reverse => "🔄",
        DecisionAction::Renew => "🔁",
        DecisionAction::Close => "🔴",
        DecisionAction::Hold | DecisionAction::StayFlat => "⏸️",
    };

    tracing::info!(
        price = observation.price,
        up_probability = ?up_probability,
        predicted = %side,
        risk = ?risk,
        action = decision.action.as_str(),
        position = %decision.side,
        hold_count = decision.hold_count,
        target = decision.target_exposure,
        "{} {}",
        icon,
        decision.reason
    );
}
