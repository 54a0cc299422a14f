//! Synthetic order flow.
//!
//! Limit, market and cancel events arrive as three independent Poisson
//! processes. Each process keeps its next arrival time between windows, so
//! consecutive windows form one continuous stream. All randomness comes from
//! the generator's own seeded [`StdRng`]; two generators built from the same
//! configuration and seed emit identical streams.

use hashbrown::HashMap;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Exp1, StandardNormal};

use crate::{
    config::{OrderFlowConfig, RegimeConfig, SizeDistribution},
    error::ConfigError,
    types::{Order, OrderId, Price, Quantity, Side, Timestamp},
};

/// Ids handed out by a generator stay below this value; everything at or
/// above it is free for orders that enter the book from elsewhere.
pub const EXTERNAL_ID_BASE: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderEvent {
    Limit(Order),
    Market(Order),
    /// Cancellation carries nothing but the id it targets.
    Cancel { order_id: OrderId, timestamp: Timestamp },
}

impl OrderEvent {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            OrderEvent::Limit(order) | OrderEvent::Market(order) => order.timestamp,
            OrderEvent::Cancel { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            OrderEvent::Limit(_) => EventKind::Limit,
            OrderEvent::Market(_) => EventKind::Market,
            OrderEvent::Cancel { .. } => EventKind::Cancel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Limit,
    Market,
    Cancel,
}

impl EventKind {
    const ALL: [EventKind; 3] = [EventKind::Limit, EventKind::Market, EventKind::Cancel];
}

/// Quote that new limit prices cluster around, in ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    pub midprice: f64,
    pub spread: f64,
}

/// Half-open interval `[start, end)` of simulated time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, duration: f64) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderFlowGenerator {
    config: OrderFlowConfig,
    seed: u64,
    rng: StdRng,
    regime: usize,
    next_order_id: u64,
    /// Pending arrival per process, in `EventKind::ALL` order.
    next_arrival: [Option<Timestamp>; 3],
    /// Issued limit orders not yet seen cancelled or filled.
    outstanding: Vec<OrderId>,
    outstanding_index: HashMap<OrderId, usize>,
}

impl OrderFlowGenerator {
    pub fn new(config: OrderFlowConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            seed,
            rng: StdRng::seed_from_u64(seed),
            regime: 0,
            next_order_id: 1,
            next_arrival: [None; 3],
            outstanding: Vec::new(),
            outstanding_index: HashMap::new(),
        })
    }

    pub fn config(&self) -> &OrderFlowConfig {
        &self.config
    }

    /// Lazily yields the events arriving inside `window`, in timestamp order.
    ///
    /// Events are drawn as the stream is pulled, so the reference quote can be
    /// moved between pulls with [`EventStream::set_reference`].
    pub fn next_events(&mut self, window: TimeWindow, reference: Reference) -> EventStream<'_> {
        for kind in EventKind::ALL {
            let slot = kind as usize;
            let stale = match self.next_arrival[slot] {
                Some(arrival) => arrival < window.start,
                None => true,
            };
            if stale {
                self.next_arrival[slot] = self.arrival_after(window.start, self.rate(kind));
            }
        }

        EventStream {
            generator: self,
            end: window.end,
            reference,
        }
    }

    /// Truncated size draw; always within `[max(1, min_size), max_size]`.
    pub fn sample_size(&mut self) -> Quantity {
        let dispersion = self.current_regime().size_dispersion;
        let z = self.standard_normal();
        let raw = match self.config.size {
            SizeDistribution::Gaussian { mean, std } => mean + std * dispersion * z,
            SizeDistribution::LogNormal { mu, sigma } => (mu + sigma * dispersion * z).exp(),
        };

        let min = self.config.min_size.max(1);
        let max = self.config.max_size.max(min);
        // NaN casts to 0 and is caught by the clamp
        (raw.round().clamp(min as f64, max as f64) as Quantity).clamp(min, max)
    }

    /// Limit price on `side` of the reference quote, never better than the
    /// touch and never below one tick.
    pub fn sample_price(&mut self, side: Side, reference: Reference) -> Price {
        let dispersion = self.current_regime().price_dispersion;
        let z = self.standard_normal();
        let offset = (self.config.mean_offset_ticks + self.config.offset_std_ticks * dispersion * z)
            .round()
            .max(0.0);

        let half_spread = reference.spread.max(0.0) / 2.0;
        let raw = match side {
            Side::Bid => reference.midprice - half_spread - offset,
            Side::Ask => reference.midprice + half_spread + offset,
        };

        (raw.round() as Price).max(1)
    }

    pub fn sample_latency(&mut self) -> f64 {
        let z = self.standard_normal();
        (self.config.mean_latency + self.config.latency_std * z).max(0.0)
    }

    /// Gaussian reference-price move over `elapsed` seconds, in currency units.
    pub fn sample_drift(&mut self, elapsed: f64) -> f64 {
        let volatility = self.volatility();
        let z = self.standard_normal();
        volatility * elapsed.max(0.0).sqrt() * z
    }

    pub fn regime(&self) -> usize {
        self.regime
    }

    pub fn volatility(&self) -> f64 {
        self.current_regime().volatility
    }

    pub fn outstanding(&self) -> &[OrderId] {
        &self.outstanding
    }

    /// Forgets an issued order once it has left the book. Returns whether the
    /// id was outstanding.
    pub fn retire(&mut self, order_id: OrderId) -> bool {
        let Some(index) = self.outstanding_index.remove(&order_id) else {
            return false;
        };
        self.outstanding.swap_remove(index);
        if let Some(moved) = self.outstanding.get(index) {
            self.outstanding_index.insert(*moved, index);
        }
        true
    }

    /// Back to the freshly constructed state, reseeded with the original seed.
    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.regime = 0;
        self.next_order_id = 1;
        self.next_arrival = [None; 3];
        self.outstanding.clear();
        self.outstanding_index.clear();
    }

    fn current_regime(&self) -> &RegimeConfig {
        // Non-empty and in range by construction
        &self.config.regimes[self.regime]
    }

    fn rate(&self, kind: EventKind) -> f64 {
        match kind {
            EventKind::Limit => self.config.limit_rate,
            EventKind::Market => self.config.market_rate,
            EventKind::Cancel => self.config.cancel_rate,
        }
    }

    fn arrival_after(&mut self, time: Timestamp, rate: f64) -> Option<Timestamp> {
        if rate <= 0.0 {
            return None;
        }
        let wait: f64 = Exp1.sample(&mut self.rng);
        Some(time + wait / rate)
    }

    fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.rng)
    }

    fn issue_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        debug_assert!(id.0 < EXTERNAL_ID_BASE);
        id
    }

    fn advance_regime(&mut self) {
        let switch = self.rng.random_bool(self.config.regime_switch_probability);
        let count = self.config.regimes.len();
        if !switch || count < 2 {
            return;
        }

        // Uniform over the other regimes
        let pick = self.rng.random_range(0..count - 1);
        let previous = self.regime;
        self.regime = if pick >= previous { pick + 1 } else { pick };

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "regime",
            from = previous,
            to = self.regime,
            volatility = self.volatility(),
        );
    }

    fn limit_order(&mut self, timestamp: Timestamp, reference: Reference) -> Order {
        let side = if self.rng.random_bool(0.5) { Side::Bid } else { Side::Ask };
        let price = self.sample_price(side, reference);
        let latency = self.sample_latency();
        let size = self.sample_size();
        let id = self.issue_id();

        self.outstanding_index.insert(id, self.outstanding.len());
        self.outstanding.push(id);

        Order {
            id,
            side,
            price,
            size,
            timestamp,
            latency,
        }
    }

    fn market_order(&mut self, timestamp: Timestamp) -> Order {
        let side = if self.rng.random_bool(self.config.market_buy_probability) {
            Side::Bid
        } else {
            Side::Ask
        };
        let latency = self.sample_latency();
        let size = self.sample_size();
        let id = self.issue_id();

        Order {
            id,
            side,
            price: 0,
            size,
            timestamp,
            latency,
        }
    }

    fn cancellation(&mut self, timestamp: Timestamp) -> Option<OrderEvent> {
        if self.outstanding.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..self.outstanding.len());
        let order_id = self.outstanding[index];
        self.retire(order_id);

        Some(OrderEvent::Cancel { order_id, timestamp })
    }
}

/// Events of one window, drawn on demand. Holds the generator for its
/// lifetime; feedback from the book goes through [`EventStream::retire`].
pub struct EventStream<'a> {
    generator: &'a mut OrderFlowGenerator,
    end: Timestamp,
    reference: Reference,
}

impl EventStream<'_> {
    pub fn set_reference(&mut self, reference: Reference) {
        self.reference = reference;
    }

    pub fn retire(&mut self, order_id: OrderId) -> bool {
        self.generator.retire(order_id)
    }

    pub fn sample_drift(&mut self, elapsed: f64) -> f64 {
        self.generator.sample_drift(elapsed)
    }

    pub fn volatility(&self) -> f64 {
        self.generator.volatility()
    }

    /// Earliest pending arrival inside the window. Ties go to the process
    /// listed first in `EventKind::ALL`.
    fn earliest(&self) -> Option<(EventKind, Timestamp)> {
        let mut earliest: Option<(EventKind, Timestamp)> = None;
        for kind in EventKind::ALL {
            let Some(arrival) = self.generator.next_arrival[kind as usize] else {
                continue;
            };
            if arrival >= self.end {
                continue;
            }
            if earliest.is_none_or(|(_, best)| arrival < best) {
                earliest = Some((kind, arrival));
            }
        }
        earliest
    }
}

impl Iterator for EventStream<'_> {
    type Item = OrderEvent;

    fn next(&mut self) -> Option<OrderEvent> {
        loop {
            let (kind, timestamp) = self.earliest()?;
            let generator = &mut *self.generator;
            let rate = generator.rate(kind);
            let following = generator.arrival_after(timestamp, rate);
            generator.next_arrival[kind as usize] = following;
            generator.advance_regime();

            let event = match kind {
                EventKind::Limit => Some(OrderEvent::Limit(generator.limit_order(timestamp, self.reference))),
                EventKind::Market => Some(OrderEvent::Market(generator.market_order(timestamp))),
                // An empty candidate set simply produces no event
                EventKind::Cancel => generator.cancellation(timestamp),
            };
            if event.is_some() {
                return event;
            }
        }
    }
}
