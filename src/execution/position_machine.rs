use chrono::{DateTime, Utc};

use crate::config::SizingSettings;
use crate::models::{Position, Side};
use crate::risk::PositionSizer;

/// What the state machine did on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    /// Flat and no usable signal
    StayFlat,
    /// Flat, signal present: new position of the signalled side
    Open,
    /// Holding, not matured: countdown decremented
    Hold,
    /// Matured with the same side signalled: horizon reset, no close/open pair
    Renew,
    /// Matured with the opposite side signalled: close then open
    Reverse,
    /// Matured with no signal (or opening not allowed): back to flat
    Close,
}

impl DecisionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionAction::StayFlat => "stay_flat",
            DecisionAction::Open => "open",
            DecisionAction::Hold => "hold",
            DecisionAction::Renew => "renew",
            DecisionAction::Reverse => "reverse",
            DecisionAction::Close => "close",
        }
    }
}

/// Order-level intent implied by a transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderIntent {
    Close { side: Side, size: f64 },
    Open { side: Side, size: f64 },
}

/// Inputs to one transition
#[derive(Debug, Clone, Copy)]
pub struct TickInput {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    /// `Side::Flat` when there is no signal or prediction is unavailable
    pub predicted_side: Side,
    /// `None` when risk could not be estimated this tick
    pub risk: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: DecisionAction,
    pub orders: Vec<OrderIntent>,
    /// Signed exposure the account should hold after this tick
    pub target_exposure: f64,
    pub side: Side,
    pub hold_count: u32,
    pub reason: String,
}

impl Decision {
    pub fn emits_close(&self) -> bool {
        self.orders
            .iter()
            .any(|o| matches!(o, OrderIntent::Close { .. }))
    }
}

/// Flat/Long/Short machine with a fixed holding horizon
///
/// Positions are only re-evaluated when `hold_count` reaches 1 (or an
/// early-exit band is crossed). `hold_count` stays in `[0, p]` and is 0
/// exactly when flat.
#[derive(Debug, Clone)]
pub struct PositionStateMachine {
    p: u32,
    sizer: PositionSizer,
    min_risk_to_open: Option<f64>,
    take_profit_std: Option<f64>,
    stop_loss_std: Option<f64>,
    position: Position,
}

impl PositionStateMachine {
    pub fn new(p: u32, sizer: PositionSizer) -> Self {
        Self {
            p: p.max(1),
            sizer,
            min_risk_to_open: None,
            take_profit_std: None,
            stop_loss_std: None,
            position: Position::flat(),
        }
    }

    pub fn from_settings(p: u32, sizing: &SizingSettings) -> Self {
        let mut machine = Self::new(p, PositionSizer::from_settings(sizing));
        machine.min_risk_to_open = sizing.min_risk_to_open;
        machine.take_profit_std = sizing.take_profit_std;
        machine.stop_loss_std = sizing.stop_loss_std;
        machine
    }

    pub fn with_min_risk_to_open(mut self, min_risk: Option<f64>) -> Self {
        self.min_risk_to_open = min_risk;
        self
    }

    pub fn with_exit_bands(mut self, take_profit_std: Option<f64>, stop_loss_std: Option<f64>) -> Self {
        self.take_profit_std = take_profit_std;
        self.stop_loss_std = stop_loss_std;
        self
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn p(&self) -> u32 {
        self.p
    }

    /// Run one transition and commit the resulting position
    pub fn transition(&mut self, input: &TickInput) -> Decision {
        // Without a risk estimate there is nothing to size with
        let signal = match input.risk {
            Some(_) => input.predicted_side,
            None => Side::Flat,
        };

        let current = self.position.clone();

        if current.is_flat() {
            return self.from_flat(signal, input);
        }

        let early_exit = self.early_exit_reason(&current, input.price);
        if current.hold_count > 1 && early_exit.is_none() {
            self.position.hold_count -= 1;
            return self.decision(
                DecisionAction::Hold,
                Vec::new(),
                format!("holding {} ({} ticks left)", current.side, self.position.hold_count),
            );
        }

        let matured_by = early_exit.unwrap_or_else(|| "horizon reached".to_string());

        // A missing risk already forced the signal to Flat, so a renewal always has one
        if let Some(risk) = input.risk.filter(|_| signal == current.side) {
            // Renewal keeps the position, only size and horizon change
            self.position.hold_count = self.p;
            self.position.size = self.sizer.size_for(risk);
            self.position.entry_price = input.price;
            self.position.entry_risk = risk;
            return self.decision(
                DecisionAction::Renew,
                Vec::new(),
                format!("{}, {} signal renewed", matured_by, signal),
            );
        }

        let close = OrderIntent::Close {
            side: current.side,
            size: current.size,
        };

        if signal == current.side.opposite() {
            if let Some(risk) = input.risk.filter(|r| self.may_open(*r)) {
                let size = self.sizer.size_for(risk);
                self.position = Position::open(signal, input.price, input.timestamp, self.p, size, risk);
                return self.decision(
                    DecisionAction::Reverse,
                    vec![close, OrderIntent::Open { side: signal, size }],
                    format!("{}, reversed {} -> {}", matured_by, current.side, signal),
                );
            }

            self.position = Position::flat();
            return self.decision(
                DecisionAction::Close,
                vec![close],
                format!("{}, {} signal below minimum risk to open", matured_by, signal),
            );
        }

        self.position = Position::flat();
        self.decision(
            DecisionAction::Close,
            vec![close],
            format!("{}, no signal", matured_by),
        )
    }

    fn from_flat(&mut self, signal: Side, input: &TickInput) -> Decision {
        let risk = match (signal, input.risk) {
            (Side::Flat, _) | (_, None) => {
                return self.decision(DecisionAction::StayFlat, Vec::new(), "no signal".to_string())
            }
            (_, Some(risk)) => risk,
        };

        if !self.may_open(risk) {
            return self.decision(
                DecisionAction::StayFlat,
                Vec::new(),
                format!("risk {:.2} below minimum to open", risk),
            );
        }

        let size = self.sizer.size_for(risk);
        self.position = Position::open(signal, input.price, input.timestamp, self.p, size, risk);
        self.decision(
            DecisionAction::Open,
            vec![OrderIntent::Open { side: signal, size }],
            format!("opened {} at {:.2}", signal, input.price),
        )
    }

    fn may_open(&self, risk: f64) -> bool {
        self.min_risk_to_open.map_or(true, |min| risk >= min)
    }

    /// Price move since entry in units of entry risk crossing a configured band
    fn early_exit_reason(&self, position: &Position, price: f64) -> Option<String> {
        if position.entry_risk <= 0.0 {
            return None;
        }
        let moved = (price - position.entry_price) * position.side.sign() / position.entry_risk;

        if let Some(tp) = self.take_profit_std {
            if moved >= tp {
                return Some(format!("take profit at {:+.2} std", moved));
            }
        }
        if let Some(sl) = self.stop_loss_std {
            if moved <= -sl {
                return Some(format!("stop loss at {:+.2} std", moved));
            }
        }
        None
    }

    fn decision(&self, action: DecisionAction, orders: Vec<OrderIntent>, reason: String) -> Decision {
        Decision {
            action,
            orders,
            target_exposure: self.position.exposure(),
            side: self.position.side,
            hold_count: self.position.hold_count,
            reason,
        }
    }
}
