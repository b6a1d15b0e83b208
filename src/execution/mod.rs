// Decision engine and the loop that drives it
pub mod control_loop;
pub mod position_machine;
pub mod price_history;
pub mod reconciler;
pub mod trading_model;

pub use control_loop::{ControlLoop, Recorder, RunStats, StepReport};
pub use position_machine::{Decision, DecisionAction, OrderIntent, PositionStateMachine, TickInput};
pub use price_history::{HistoryError, PriceHistory};
pub use reconciler::{ReconcileAction, ReconcileOutcome, Reconciler};
pub use trading_model::{TickOutcome, TickReport, TradingModel};
