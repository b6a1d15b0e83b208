use crate::execution::DecisionAction;
use serde::{Deserialize, Serialize};

/// Summary of one offline replay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayMetrics {
    pub ticks: usize,
    pub warming_ticks: usize,
    pub decisions: usize,
    pub opens: usize,
    pub renewals: usize,
    pub reversals: usize,
    pub closes: usize,
    pub orders: usize,
    pub prediction_failures: usize,
    pub seeded: bool,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub final_exposure: f64,
}

impl ReplayMetrics {
    pub fn record_action(&mut self, action: DecisionAction) {
        self.decisions += 1;
        match action {
            DecisionAction::Open => self.opens += 1,
            DecisionAction::Renew => self.renewals += 1,
            DecisionAction::Reverse => self.reversals += 1,
            DecisionAction::Close => self.closes += 1,
            DecisionAction::Hold | DecisionAction::StayFlat => {}
        }
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(50));
        println!("REPLAY SUMMARY");
        println!("{}", "=".repeat(50));
        println!("Ticks:               {}", self.ticks);
        println!("  warming:           {}", self.warming_ticks);
        println!("  seeded at start:   {}", self.seeded);
        println!("Decisions:           {}", self.decisions);
        println!("  opens:             {}", self.opens);
        println!("  renewals:          {}", self.renewals);
        println!("  reversals:         {}", self.reversals);
        println!("  closes:            {}", self.closes);
        println!("Orders sent:         {}", self.orders);
        println!("Prediction failures: {}", self.prediction_failures);
        println!("Realized PnL:        {:.2}", self.realized_pnl);
        println!("Unrealized PnL:      {:.2}", self.unrealized_pnl);
        println!("Total PnL:           {:.2}", self.total_pnl());
        println!("Final exposure:      {:+.3}", self.final_exposure);
        println!("{}", "=".repeat(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_action_counts() {
        let mut metrics = ReplayMetrics::default();
        for action in [
            DecisionAction::Open,
            DecisionAction::Hold,
            DecisionAction::Renew,
            DecisionAction::Reverse,
            DecisionAction::Close,
            DecisionAction::StayFlat,
        ] {
            metrics.record_action(action);
        }

        assert_eq!(metrics.decisions, 6);
        assert_eq!(metrics.opens, 1);
        assert_eq!(metrics.renewals, 1);
        assert_eq!(metrics.reversals, 1);
        assert_eq!(metrics.closes, 1);
    }
}
