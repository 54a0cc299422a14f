use serde::{Deserialize, Serialize};

/// Price in integer ticks.
pub type Price = i64;
pub type Quantity = u64;
/// Largest size a single order may carry; fills always fit a signed inventory.
pub const MAX_ORDER_SIZE: Quantity = i64::MAX as Quantity;
/// Simulated time in seconds.
pub type Timestamp = f64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Side::Bid => 1.0,
            Side::Ask => -1.0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

/// An order as seen by the matching engine. `price` is ignored for market orders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub price: Price,
    pub size: Quantity,
    pub timestamp: Timestamp,
    pub latency: f64,
}

impl Order {
    pub fn limit(id: OrderId, side: Side, price: Price, size: Quantity, timestamp: Timestamp) -> Self {
        Self {
            id,
            side,
            price,
            size,
            timestamp,
            latency: 0.0,
        }
    }

    pub fn market(id: OrderId, side: Side, size: Quantity, timestamp: Timestamp) -> Self {
        Self {
            id,
            side,
            price: 0,
            size,
            timestamp,
            latency: 0.0,
        }
    }

    pub fn with_latency(mut self, latency: f64) -> Self {
        self.latency = latency;
        self
    }
}

/// One execution between an incoming (aggressor) order and a resting order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub aggressor: OrderId,
    pub resting: OrderId,
    /// Side of the aggressor.
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: Timestamp,
}

/// Rank of a resting order inside its price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePosition {
    /// 0-based, 0 is next to trade.
    pub rank: usize,
    pub level_size: Quantity,
}
