use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Price of the traded instrument at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PriceObservation {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }
}

/// Direction of exposure, also used for the predicted direction of a tick
///
/// `Flat` doubles as the "no signal" prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
    Flat,
}

impl Side {
    /// +1 for long, -1 for short, 0 for flat
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
            Side::Flat => 0.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
            Side::Flat => Side::Flat,
        }
    }

    pub fn is_flat(self) -> bool {
        self == Side::Flat
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
            Side::Flat => "FLAT",
        };
        f.write_str(s)
    }
}

/// Position held by one trading model
///
/// A flat position carries `hold_count == 0` and `size == 0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub side: Side,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    pub hold_count: u32,
    pub size: f64,
    /// Risk metric at entry, used to express price moves in risk units
    pub entry_risk: f64,
}

impl Position {
    pub fn flat() -> Self {
        Self {
            id: Uuid::nil(),
            side: Side::Flat,
            entry_price: 0.0,
            opened_at: DateTime::<Utc>::UNIX_EPOCH,
            hold_count: 0,
            size: 0.0,
            entry_risk: 0.0,
        }
    }

    pub fn open(
        side: Side,
        entry_price: f64,
        opened_at: DateTime<Utc>,
        hold_count: u32,
        size: f64,
        entry_risk: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            side,
            entry_price,
            opened_at,
            hold_count,
            size,
            entry_risk,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side.is_flat()
    }

    /// Signed exposure: positive long, negative short
    pub fn exposure(&self) -> f64 {
        self.side.sign() * self.size
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}

/// Order direction as understood by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Net position reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub side: Side,
    pub size: f64,
}

impl ExchangePosition {
    pub fn flat() -> Self {
        Self {
            side: Side::Flat,
            size: 0.0,
        }
    }

    /// Build from a signed net size (positive long, negative short)
    pub fn from_signed(net: f64) -> Self {
        if net > 0.0 {
            Self {
                side: Side::Long,
                size: net,
            }
        } else if net < 0.0 {
            Self {
                side: Side::Short,
                size: -net,
            }
        } else {
            Self::flat()
        }
    }

    pub fn signed(&self) -> f64 {
        self.side.sign() * self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!(Side::Flat.sign(), 0.0);
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Flat.opposite(), Side::Flat);
    }

    #[test]
    fn test_position_exposure() {
        let position = Position::open(Side::Short, 100.0, Utc::now(), 30, 0.02, 5.0);
        assert_eq!(position.exposure(), -0.02);
        assert!(!position.is_flat());
        assert_eq!(Position::flat().exposure(), 0.0);
    }

    #[test]
    fn test_exchange_position_from_signed() {
        let long = ExchangePosition::from_signed(0.003);
        assert_eq!(long.side, Side::Long);
        assert_eq!(long.size, 0.003);

        let short = ExchangePosition::from_signed(-0.002);
        assert_eq!(short.side, Side::Short);
        assert_eq!(short.signed(), -0.002);

        assert_eq!(ExchangePosition::from_signed(0.0), ExchangePosition::flat());
    }

    #[test]
    fn test_order_side_display() {
        assert_eq!(OrderSide::Buy.to_string(), "BUY");
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }
}
