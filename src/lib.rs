//! Continuous double-auction market simulator.
//!
//! [`orderbook::OrderBook`] matches under price-time priority,
//! [`flow::OrderFlowGenerator`] produces seeded synthetic order flow,
//! [`impact::MarketImpact`] turns executed volume into price offsets, and
//! [`simulator::MarketSimulator`] ties the three together in simulated time.

pub mod config;
pub mod error;
pub mod flow;
pub mod impact;
pub mod orderbook;
pub mod simulator;
pub mod types;

pub use config::SimulationConfig;
pub use error::{ConfigError, EmptyBook, InvalidOrder, OrderNotFound};
pub use simulator::{MarketSimulator, MarketState, StepReport};
pub use types::{Fill, OrderId, Side};

#[cfg(test)]
mod tests;
