use crate::api::{Exchange, ExchangeError};
use crate::models::{ExchangePosition, OrderSide};

/// What reconciliation decided to send
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    InSync { actual: f64 },
    Order { side: OrderSide, size: f64, actual: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    pub order_id: Option<String>,
}

/// Brings the exchange position to the model's target exposure
///
/// The order is always `target - actual`, so re-running after a failed or
/// skipped tick never applies the same change twice.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    min_order_size: f64,
}

impl Reconciler {
    pub fn new(min_order_size: f64) -> Self {
        Self { min_order_size }
    }

    /// Minimal order taking `actual` to `target`
    pub fn plan(&self, target: f64, actual: &ExchangePosition) -> ReconcileAction {
        let actual = actual.signed();
        let delta = target - actual;

        // Sub-lot residue is left alone
        if delta.abs() < self.min_order_size - 1e-12 {
            return ReconcileAction::InSync { actual };
        }

        let side = if delta > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
        ReconcileAction::Order {
            side,
            size: delta.abs(),
            actual,
        }
    }

    pub async fn reconcile(
        &self,
        exchange: &dyn Exchange,
        target: f64,
    ) -> Result<ReconcileOutcome, ExchangeError> {
        let actual = exchange.get_position().await?;
        let action = self.plan(target, &actual);

        let order_id = match &action {
            ReconcileAction::InSync { .. } => None,
            ReconcileAction::Order { side, size, actual } => {
                tracing::info!(
                    side = %side,
                    size = *size,
                    actual = *actual,
                    target,
                    "⚖️  Reconciling exchange position"
                );
                exchange.make_order(*side, *size).await?
            }
        };

        Ok(ReconcileOutcome { action, order_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperExchange;

    #[test]
    fn test_plan_in_sync() {
        let reconciler = Reconciler::new(0.001);
        let action = reconciler.plan(0.005, &ExchangePosition::from_signed(0.005));
        assert_eq!(action, ReconcileAction::InSync { actual: 0.005 });
    }

    #[test]
    fn test_plan_flips_through_zero_in_one_order() {
        let reconciler = Reconciler::new(0.001);
        match reconciler.plan(-0.004, &ExchangePosition::from_signed(0.005)) {
            ReconcileAction::Order { side, size, .. } => {
                assert_eq!(side, OrderSide::Sell);
                assert!((size - 0.009).abs() < 1e-12);
            }
            other => panic!("expected order, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_ignores_sub_lot_delta() {
        let reconciler = Reconciler::new(0.001);
        let action = reconciler.plan(0.0054, &ExchangePosition::from_signed(0.005));
        assert!(matches!(action, ReconcileAction::InSync { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let exchange = PaperExchange::new();
        exchange.set_price(100.0);
        let reconciler = Reconciler::new(0.001);

        let first = reconciler.reconcile(&exchange, 0.003).await.unwrap();
        assert!(first.order_id.is_some());

        let second = reconciler.reconcile(&exchange, 0.003).await.unwrap();
        assert!(matches!(second.action, ReconcileAction::InSync { .. }));
        assert_eq!(exchange.fills().len(), 1);
    }
}
