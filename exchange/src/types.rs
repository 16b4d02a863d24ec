//! Core domain types shared across the engine.

use crate::proto;

/// One executed trade replayed from the input tape.
///
/// Tape trades are read-only: the driver consumes each exactly once to
/// update the bar aggregator and drive matching.
#[derive(Debug, Clone, PartialEq)]
pub struct TapeTrade {
    pub ticker: String,
    /// Time of day as an HHMMSS integer, e.g. `100015`.
    pub time: i32,
    pub price: f32,
    pub volume: i32,
}

/// A resting limit order.
///
/// Doubles as the fill message published to the deals bus when (part of)
/// the order executes.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Exchange-assigned id, unique service-wide.
    pub id: i64,
    pub broker_id: i64,
    pub ticker: String,
    pub price: f32,
    /// Signed quantity: positive buys, negative sells.
    pub amount: i32,
    /// Set once the remaining amount has been reduced by at least one fill.
    pub partial: bool,
}

impl From<Order> for proto::Deal {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            broker_id: order.broker_id,
            ticker: order.ticker,
            time: 0,
            price: order.price,
            amount: order.amount,
            partial: order.partial,
        }
    }
}

impl From<proto::Deal> for Order {
    /// Exchange-owned fields (`id`, `partial`) are reset; the exchange
    /// assigns them on add.
    fn from(deal: proto::Deal) -> Self {
        Self {
            id: 0,
            broker_id: deal.broker_id,
            ticker: deal.ticker,
            price: deal.price,
            amount: deal.amount,
            partial: false,
        }
    }
}
