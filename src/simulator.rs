//! Orchestration of book, order flow and impact.
//!
//! [`MarketSimulator::step`] pulls one window of generated events, applies
//! them to the book in timestamp order, feeds every execution to the impact
//! model and reports the resulting [`MarketState`]. External participants use
//! the synchronous submit/cancel calls between steps.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::SimulationConfig,
    error::{ConfigError, InvalidOrder, OrderNotFound},
    flow::{EXTERNAL_ID_BASE, EventStream, OrderEvent, OrderFlowGenerator, Reference, TimeWindow},
    impact::MarketImpact,
    orderbook::{BookDepth, LevelSummary, OrderBook},
    types::{Fill, Order, OrderId, Price, Quantity, QueuePosition, Side, Timestamp},
};

/// Tag carried by the liquidity seeded at construction.
pub const LIQUIDITY_PROVIDER: &str = "liquidity_provider";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Stepping,
}

/// Observable market at one instant. Prices are in currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub timestamp: Timestamp,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    /// Book midpoint, or the last one observed while the book is empty.
    pub midprice: f64,
    pub spread: f64,
    pub imbalance: f64,
    pub volatility: f64,
    pub regime: usize,
    pub impact_offset: f64,
    /// Price the synthetic flow is currently quoting around.
    pub reference_price: f64,
    pub total_volume: Quantity,
    pub trade_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub state: MarketState,
    /// Every fill since the previous step, external submissions included.
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub size: Quantity,
    pub order_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub timestamp: Timestamp,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraderPosition {
    pub inventory: i64,
    pub cash: f64,
    pub open_orders: Vec<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub duration: f64,
    pub steps: usize,
    pub trade_count: u64,
    pub total_volume: Quantity,
    pub fills: usize,
    pub mean_midprice: f64,
    pub midprice_std: f64,
    pub mean_spread: f64,
    pub spread_std: f64,
    pub mean_imbalance: f64,
    pub mean_volatility: f64,
    pub final_state: Option<MarketState>,
}

/// Per-tag inventory and cash, fed by every fill touching a tagged order.
#[derive(Debug, Clone, Default)]
struct Ledger {
    owners: HashMap<OrderId, String>,
    positions: BTreeMap<String, TraderPosition>,
}

impl Ledger {
    fn open(&mut self, order_id: OrderId, tag: &str) {
        self.owners.insert(order_id, tag.to_owned());
        self.positions.entry(tag.to_owned()).or_default().open_orders.push(order_id);
    }

    fn close(&mut self, order_id: OrderId) {
        let Some(tag) = self.owners.remove(&order_id) else {
            return;
        };
        if let Some(position) = self.positions.get_mut(&tag) {
            position.open_orders.retain(|open| *open != order_id);
        }
    }

    fn apply(&mut self, fill: &Fill, tick_size: f64) {
        let notional = fill.price as f64 * tick_size * fill.quantity as f64;
        // Order sizes are capped at MAX_ORDER_SIZE, so this never saturates
        let quantity = i64::try_from(fill.quantity).unwrap_or(i64::MAX);
        for (order_id, side) in [(fill.aggressor, fill.side), (fill.resting, fill.side.opposite())] {
            let Some(tag) = self.owners.get(&order_id) else {
                continue;
            };
            let position = self.positions.entry(tag.clone()).or_default();
            match side {
                Side::Bid => {
                    position.inventory = position.inventory.saturating_add(quantity);
                    position.cash -= notional;
                }
                Side::Ask => {
                    position.inventory = position.inventory.saturating_sub(quantity);
                    position.cash += notional;
                }
            }
        }
    }
}

/// Everything the event loop mutates apart from the generator.
#[derive(Debug)]
struct Exchange {
    tick_size: f64,
    initial_spread: f64,
    imbalance_depth: usize,
    book: OrderBook,
    impact: MarketImpact,
    /// Fundamental price before impact, in currency units.
    anchor: f64,
    last_midprice: f64,
    ledger: Ledger,
    pending_fills: Vec<Fill>,
    fill_log: Vec<Fill>,
    missed_cancels: u64,
}

impl Exchange {
    fn new(config: &SimulationConfig) -> Self {
        Self {
            tick_size: config.tick_size,
            initial_spread: config.initial_spread,
            imbalance_depth: config.imbalance_depth,
            book: OrderBook::new(),
            impact: MarketImpact::from_config(&config.impact),
            anchor: config.initial_midprice,
            last_midprice: config.initial_midprice,
            ledger: Ledger::default(),
            pending_fills: Vec::new(),
            fill_log: Vec::new(),
            missed_cancels: 0,
        }
    }

    fn to_ticks(&self, price: f64) -> Price {
        (price / self.tick_size).round() as Price
    }

    fn to_price(&self, ticks: Price) -> f64 {
        ticks as f64 * self.tick_size
    }

    fn midprice(&self) -> f64 {
        self.book
            .midprice()
            .map(|mid| mid * self.tick_size)
            .unwrap_or(self.last_midprice)
    }

    fn spread(&self) -> f64 {
        self.book
            .spread()
            .map(|spread| self.to_price(spread))
            .unwrap_or(self.initial_spread)
    }

    fn refresh_midprice(&mut self) {
        self.last_midprice = self.midprice();
    }

    fn reference_price(&self, now: Timestamp) -> f64 {
        (self.anchor + self.impact.offset_at(now)).max(self.tick_size)
    }

    /// Quote for the generator, in ticks. Prunes decayed impact on the way.
    fn quote(&mut self, now: Timestamp) -> Reference {
        let offset = self.impact.current_offset(now);
        let reference = (self.anchor + offset).max(self.tick_size);
        Reference {
            midprice: reference / self.tick_size,
            spread: self.spread() / self.tick_size,
        }
    }

    /// Logs fills, updates the ledger and books one impact per aggressor
    /// order. Returns the resting orders that left the book.
    fn settle(&mut self, fills: &[Fill], volatility: f64) -> Vec<OrderId> {
        let mut closed = Vec::new();
        let mut aggressor: Option<(OrderId, Side, Timestamp, Quantity)> = None;

        for fill in fills {
            self.ledger.apply(fill, self.tick_size);
            if !self.book.contains(fill.resting) {
                self.ledger.close(fill.resting);
                closed.push(fill.resting);
            }

            #[cfg(feature = "instrument")]
            tracing::info!(
                target: "fill",
                time = fill.timestamp,
                aggressor = fill.aggressor.0,
                resting = fill.resting.0,
                price = self.to_price(fill.price),
                quantity = fill.quantity,
            );

            aggressor = match aggressor {
                Some((id, side, time, volume)) if id == fill.aggressor => Some((id, side, time, volume + fill.quantity)),
                Some((_, side, time, volume)) => {
                    self.impact.on_trade(time, side, volume, volatility);
                    Some((fill.aggressor, fill.side, fill.timestamp, fill.quantity))
                }
                None => Some((fill.aggressor, fill.side, fill.timestamp, fill.quantity)),
            };
        }
        if let Some((_, side, time, volume)) = aggressor {
            self.impact.on_trade(time, side, volume, volatility);
        }

        self.pending_fills.extend_from_slice(fills);
        self.fill_log.extend_from_slice(fills);
        closed
    }

    /// Applies one generated event; feedback for the generator goes through
    /// `stream`.
    fn apply(&mut self, event: OrderEvent, stream: &mut EventStream<'_>) -> Result<(), InvalidOrder> {
        let volatility = stream.volatility();
        match event {
            OrderEvent::Limit(order) => {
                let outcome = self.book.submit_limit(order)?;
                if outcome.resting.is_none() {
                    stream.retire(order.id);
                }
                for closed in self.settle(&outcome.fills, volatility) {
                    stream.retire(closed);
                }
            }
            OrderEvent::Market(order) => {
                let outcome = self.book.submit_market(order)?;
                for closed in self.settle(&outcome.fills, volatility) {
                    stream.retire(closed);
                }
            }
            OrderEvent::Cancel { order_id, .. } => match self.book.cancel(order_id) {
                Ok(_) => self.ledger.close(order_id),
                // Filled before the cancel arrived
                Err(OrderNotFound(_)) => self.missed_cancels += 1,
            },
        }
        self.refresh_midprice();
        Ok(())
    }
}

#[derive(Debug)]
pub struct MarketSimulator {
    config: SimulationConfig,
    generator: OrderFlowGenerator,
    exchange: Exchange,
    phase: Phase,
    now: Timestamp,
    next_external_id: u64,
    rejected_events: u64,
    history: Vec<MarketState>,
}

impl MarketSimulator {
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let generator = OrderFlowGenerator::new(config.order_flow.clone(), config.seed)?;
        let exchange = Exchange::new(&config);

        let mut simulator = Self {
            config,
            generator,
            exchange,
            phase: Phase::Idle,
            now: 0.0,
            next_external_id: EXTERNAL_ID_BASE,
            rejected_events: 0,
            history: Vec::new(),
        };
        simulator.seed_liquidity();
        Ok(simulator)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Read-only access for observation building.
    pub fn book(&self) -> &OrderBook {
        &self.exchange.book
    }

    /// Advances simulated time by `duration` seconds. A negative or
    /// non-finite duration is treated as zero.
    pub fn step(&mut self, duration: f64) -> StepReport {
        self.phase = Phase::Stepping;
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let window = TimeWindow::new(self.now, duration);

        let exchange = &mut self.exchange;
        let reference = exchange.quote(window.start);
        let mut stream = self.generator.next_events(window, reference);
        let mut clock = window.start;

        while let Some(event) = stream.next() {
            let timestamp = event.timestamp();
            exchange.anchor += stream.sample_drift(timestamp - clock);
            clock = timestamp;

            if exchange.apply(event, &mut stream).is_err() {
                debug_assert!(false, "generator produced an invalid order: {event:?}");
                self.rejected_events += 1;
            }
            stream.set_reference(exchange.quote(clock));
        }
        exchange.anchor += stream.sample_drift(window.end - clock);
        drop(stream);

        self.now = window.end;
        let state = self.state();
        self.history.push(state.clone());
        self.phase = Phase::Idle;

        #[cfg(feature = "instrument")]
        tracing::info!(
            target: "step",
            time = state.timestamp,
            midprice = state.midprice,
            spread = state.spread,
            regime = state.regime,
            fills = self.exchange.pending_fills.len(),
        );

        StepReport {
            state,
            fills: std::mem::take(&mut self.exchange.pending_fills),
        }
    }

    /// Places a limit order at `price` (rounded to the tick grid) for
    /// `trader_tag`. Crossing volume executes immediately.
    pub fn submit_limit(
        &mut self,
        side: Side,
        price: f64,
        size: Quantity,
        trader_tag: &str,
    ) -> Result<OrderId, InvalidOrder> {
        // Written negated so NaN is rejected too
        if !(price > 0.0) {
            return Err(InvalidOrder::NonPositivePrice);
        }
        let ticks = self.exchange.to_ticks(price);
        if ticks <= 0 {
            return Err(InvalidOrder::NonPositivePrice);
        }

        let order_id = OrderId(self.next_external_id);
        let order = Order::limit(order_id, side, ticks, size, self.now);

        let outcome = self.exchange.book.submit_limit(order)?;
        self.next_external_id += 1;

        // Registered before settling so the order's own fills reach the ledger
        self.exchange.ledger.open(order_id, trader_tag);

        self.settle(&outcome.fills);
        if outcome.resting.is_none() {
            self.exchange.ledger.close(order_id);
        }
        self.exchange.refresh_midprice();

        Ok(order_id)
    }

    /// Sweeps the opposite side for up to `size`. Unfilled size is dropped.
    pub fn submit_market(&mut self, side: Side, size: Quantity) -> Result<Vec<Fill>, InvalidOrder> {
        let order = Order::market(OrderId(self.next_external_id), side, size, self.now);
        let outcome = self.exchange.book.submit_market(order)?;
        self.next_external_id += 1;

        self.settle(&outcome.fills);
        self.exchange.refresh_midprice();

        Ok(outcome.fills)
    }

    pub fn cancel(&mut self, order_id: OrderId) -> Result<(), OrderNotFound> {
        self.exchange.book.cancel(order_id)?;
        self.exchange.ledger.close(order_id);
        self.generator.retire(order_id);
        self.exchange.refresh_midprice();
        Ok(())
    }

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        let BookDepth { bids, asks } = self.exchange.book.snapshot(depth);
        let convert = |levels: Vec<LevelSummary>| -> Vec<DepthLevel> {
            levels
                .into_iter()
                .map(|level| DepthLevel {
                    price: self.exchange.to_price(level.price),
                    size: level.quantity,
                    order_count: level.order_count,
                })
                .collect()
        };

        OrderBookSnapshot {
            timestamp: self.now,
            bids: convert(bids),
            asks: convert(asks),
        }
    }

    pub fn state(&self) -> MarketState {
        let exchange = &self.exchange;
        let book = &exchange.book;

        MarketState {
            timestamp: self.now,
            best_bid: book.best_bid().map(|price| exchange.to_price(price)),
            best_ask: book.best_ask().map(|price| exchange.to_price(price)),
            midprice: exchange.midprice(),
            spread: exchange.spread(),
            imbalance: book.imbalance(exchange.imbalance_depth),
            volatility: self.generator.volatility(),
            regime: self.generator.regime(),
            impact_offset: exchange.impact.offset_at(self.now),
            reference_price: exchange.reference_price(self.now),
            total_volume: book.total_volume(),
            trade_count: book.trade_count(),
        }
    }

    pub fn queue_position(&self, order_id: OrderId) -> Option<QueuePosition> {
        self.exchange.book.queue_position(order_id)
    }

    pub fn position(&self, trader_tag: &str) -> Option<&TraderPosition> {
        self.exchange.ledger.positions.get(trader_tag)
    }

    /// Cash plus, when `mark_to_market`, inventory valued at the midprice.
    pub fn pnl(&self, trader_tag: &str, mark_to_market: bool) -> Option<f64> {
        let position = self.position(trader_tag)?;
        let mut pnl = position.cash;
        if mark_to_market {
            pnl += position.inventory as f64 * self.exchange.midprice();
        }
        Some(pnl)
    }

    pub fn history(&self) -> &[MarketState] {
        &self.history
    }

    /// Every fill of the session, oldest first.
    pub fn fills(&self) -> &[Fill] {
        &self.exchange.fill_log
    }

    /// Generated cancellations whose target had already left the book.
    pub fn missed_cancels(&self) -> u64 {
        self.exchange.missed_cancels
    }

    pub fn rejected_events(&self) -> u64 {
        self.rejected_events
    }

    /// Steps `floor(duration / time_step)` times, at most `max_run_steps`,
    /// and summarises the states those steps produced. A `time_step` that is
    /// not positive and finite runs no steps.
    pub fn run(&mut self, duration: f64, time_step: f64) -> RunSummary {
        let valid = time_step.is_finite() && time_step > 0.0 && duration.is_finite() && duration > 0.0;
        let steps = if valid {
            ((duration / time_step) as usize).min(self.config.max_run_steps)
        } else {
            0
        };

        let start = self.history.len();
        let mut fills = 0;
        for _ in 0..steps {
            fills += self.step(time_step).fills.len();
        }
        let states = &self.history[start..];

        let (mean_midprice, midprice_std) = mean_std(states.iter().map(|state| state.midprice));
        let (mean_spread, spread_std) = mean_std(states.iter().map(|state| state.spread));
        let (mean_imbalance, _) = mean_std(states.iter().map(|state| state.imbalance));
        let (mean_volatility, _) = mean_std(states.iter().map(|state| state.volatility));

        RunSummary {
            duration,
            steps,
            trade_count: self.exchange.book.trade_count(),
            total_volume: self.exchange.book.total_volume(),
            fills,
            mean_midprice,
            midprice_std,
            mean_spread,
            spread_std,
            mean_imbalance,
            mean_volatility,
            final_state: states.last().cloned(),
        }
    }

    /// Back to the freshly constructed state: same seed, same seed liquidity.
    pub fn reset(&mut self) {
        self.generator.reset();
        self.exchange = Exchange::new(&self.config);
        self.phase = Phase::Idle;
        self.now = 0.0;
        self.next_external_id = EXTERNAL_ID_BASE;
        self.rejected_events = 0;
        self.history.clear();
        self.seed_liquidity();
    }

    fn settle(&mut self, fills: &[Fill]) {
        let volatility = self.generator.volatility();
        for closed in self.exchange.settle(fills, volatility) {
            self.generator.retire(closed);
        }
    }

    fn seed_liquidity(&mut self) {
        let config = &self.config;
        let half_spread = config.initial_spread / 2.0;
        let best_bid = self.exchange.to_ticks(config.initial_midprice - half_spread);
        let best_ask = self.exchange.to_ticks(config.initial_midprice + half_spread).max(best_bid + 1);

        for level in 0..config.initial_depth_levels {
            let size = (level as u64)
                .saturating_mul(config.level_size_step)
                .saturating_add(config.initial_level_size);
            let offset = level as Price;

            for (side, price) in [(Side::Bid, best_bid - offset), (Side::Ask, best_ask + offset)] {
                if price <= 0 {
                    continue;
                }
                let order_id = OrderId(self.next_external_id);
                self.next_external_id += 1;

                let result = self.exchange.book.submit_limit(Order::limit(order_id, side, price, size, 0.0));
                debug_assert!(result.is_ok(), "seed liquidity rejected: {result:?}");
                if result.is_ok() {
                    self.exchange.ledger.open(order_id, LIQUIDITY_PROVIDER);
                }
            }
        }
        self.exchange.refresh_midprice();
    }
}

fn mean_std(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / count;
    (mean, variance.sqrt())
}
