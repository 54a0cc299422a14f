use std::collections::{BTreeMap, btree_map::Entry};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use slab::Slab;

use crate::{
    error::{EmptyBook, InvalidOrder, OrderNotFound},
    types::{Fill, MAX_ORDER_SIZE, Order, OrderId, Price, Quantity, QueuePosition, Side, Timestamp},
};

#[derive(Debug, Clone, PartialEq)]
pub struct OrderNode {
    pub order_id: OrderId,
    pub quantity: Quantity,
    pub timestamp: Timestamp,
    pub latency: f64,
    pub previous: Option<usize>,
    pub next: Option<usize>,
}

/// FIFO of resting orders at one price, threaded through the node slab.
/// A level only exists while it holds at least one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    pub head: usize,
    pub tail: usize,
    pub total_quantity: Quantity,
    pub order_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexMapEntry {
    pub(crate) order_index: usize,
    pub(crate) price: Price,
    pub(crate) side: Side,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitOrderOutcome {
    pub fills: Vec<Fill>,
    /// Set when a remainder was left resting in the book.
    pub resting: Option<QueuePosition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrderOutcome {
    pub fills: Vec<Fill>,
    /// Size left over once the opposite side ran dry.
    pub unfilled: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub price: Price,
    pub quantity: Quantity,
    pub order_count: usize,
}

/// Aggregated view of the top of book, best level first on both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDepth {
    pub bids: Vec<LevelSummary>,
    pub asks: Vec<LevelSummary>,
}

/// Price-time priority matching engine.
///
/// Bids and asks are both keyed ascending; the best bid is the last key and
/// the best ask the first. Resting orders live in `orders` and are reachable
/// through `index_map` for cancellation.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub(crate) bids: BTreeMap<Price, PriceLevel>,
    pub(crate) asks: BTreeMap<Price, PriceLevel>,
    pub(crate) orders: Slab<OrderNode>, // General Storage for order nodes
    pub(crate) index_map: HashMap<OrderId, IndexMapEntry>, // Reverse lookup Order Id, for fast cancels
    total_volume: Quantity,
    trade_count: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches `order` against the opposite side while its price crosses, then
    /// rests any remainder at the back of its level.
    pub fn submit_limit(&mut self, order: Order) -> Result<LimitOrderOutcome, InvalidOrder> {
        validate(&order)?;
        if order.price <= 0 {
            return Err(InvalidOrder::NonPositivePrice);
        }
        if self.index_map.contains_key(&order.id) {
            return Err(InvalidOrder::OrderIdAlreadyExists(order.id));
        }
        // Matching never adds to the order's own level, so this bounds the resting total
        let level_total = self
            .levels(order.side)
            .get(&order.price)
            .map_or(0, |level| level.total_quantity);
        if level_total.checked_add(order.size).is_none() {
            return Err(InvalidOrder::SizeOverflow);
        }

        let mut fills = Vec::new();
        let remaining = self.match_incoming(&order, Some(order.price), &mut fills);
        let resting = (remaining > 0).then(|| self.rest(&order, remaining));

        Ok(LimitOrderOutcome { fills, resting })
    }

    /// Sweeps the opposite side from the best level outward. Running out of
    /// liquidity is not an error, the leftover is reported as `unfilled`.
    pub fn submit_market(&mut self, order: Order) -> Result<MarketOrderOutcome, InvalidOrder> {
        validate(&order)?;

        let mut fills = Vec::new();
        let unfilled = self.match_incoming(&order, None, &mut fills);

        Ok(MarketOrderOutcome { fills, unfilled })
    }

    /// Removes a resting order, returning the size that was still open.
    pub fn cancel(&mut self, order_id: OrderId) -> Result<Quantity, OrderNotFound> {
        // Lookup if order exists
        let Some(entry) = self.index_map.get(&order_id).copied() else {
            return Err(OrderNotFound(order_id));
        };
        let levels = match entry.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };

        let removed = detach(
            levels,
            &mut self.orders,
            &mut self.index_map,
            entry.price,
            entry.order_index,
        );
        debug_assert!(removed.is_some(), "index entry without a resting node");

        removed.map(|node| node.quantity).ok_or(OrderNotFound(order_id))
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.last_key_value().map(|(price, _)| *price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first_key_value().map(|(price, _)| *price)
    }

    /// Midpoint in ticks. With one side empty the remaining best price is
    /// returned; only a fully empty book is an error.
    pub fn midprice(&self) -> Result<f64, EmptyBook> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Ok((bid + ask) as f64 / 2.0),
            (Some(price), None) | (None, Some(price)) => Ok(price as f64),
            (None, None) => Err(EmptyBook),
        }
    }

    pub fn spread(&self) -> Option<Price> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    pub fn snapshot(&self, depth: usize) -> BookDepth {
        BookDepth {
            bids: summarize(&self.bids, Side::Bid, depth),
            asks: summarize(&self.asks, Side::Ask, depth),
        }
    }

    /// `(bid - ask) / (bid + ask)` over the top `depth` levels, in [-1, 1].
    pub fn imbalance(&self, depth: usize) -> f64 {
        let volume = |levels: Vec<LevelSummary>| -> f64 {
            levels.iter().map(|level| level.quantity as f64).sum()
        };
        let bid = volume(summarize(&self.bids, Side::Bid, depth));
        let ask = volume(summarize(&self.asks, Side::Ask, depth));

        if bid + ask > 0.0 {
            (bid - ask) / (bid + ask)
        } else {
            0.0
        }
    }

    pub fn queue_position(&self, order_id: OrderId) -> Option<QueuePosition> {
        let entry = self.index_map.get(&order_id)?;
        let level = self.levels(entry.side).get(&entry.price)?;

        let mut iter = PriceLevelIter::new(level);
        let mut rank = 0;
        while let Some((index, _)) = iter.next(&self.orders) {
            if index == entry.order_index {
                return Some(QueuePosition {
                    rank,
                    level_size: level.total_quantity,
                });
            }
            rank += 1;
        }
        None
    }

    /// Open size of a resting order.
    pub fn remaining(&self, order_id: OrderId) -> Option<Quantity> {
        let entry = self.index_map.get(&order_id)?;
        self.orders.get(entry.order_index).map(|node| node.quantity)
    }

    pub fn side_of(&self, order_id: OrderId) -> Option<Side> {
        self.index_map.get(&order_id).map(|entry| entry.side)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index_map.contains_key(&order_id)
    }

    /// Number of resting orders.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn level_count(&self, side: Side) -> usize {
        self.levels(side).len()
    }

    pub fn total_volume(&self) -> Quantity {
        self.total_volume
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count
    }

    /// Walks every level and checks the structural invariants: links agree
    /// with the level metadata, aggregates match member sizes, no empty
    /// level or zero-sized order survives, and the id index covers exactly
    /// the resting orders.
    pub fn is_consistent(&self) -> bool {
        let mut seen = 0;
        for side in [Side::Bid, Side::Ask] {
            for (&price, level) in self.levels(side) {
                if level.order_count == 0 || level.total_quantity == 0 {
                    return false;
                }

                let mut iter = PriceLevelIter::new(level);
                let mut previous = None;
                let mut count = 0;
                let mut quantity = 0;
                while let Some((index, node)) = iter.next(&self.orders) {
                    let indexed = self.index_map.get(&node.order_id);
                    let entry = IndexMapEntry {
                        order_index: index,
                        price,
                        side,
                    };
                    if node.quantity == 0 || node.previous != previous || indexed != Some(&entry) {
                        return false;
                    }
                    previous = Some(index);
                    count += 1;
                    quantity += node.quantity;
                    if count > self.orders.len() {
                        return false;
                    }
                }

                if previous != Some(level.tail) || count != level.order_count || quantity != level.total_quantity {
                    return false;
                }
                seen += count;
            }
        }

        seen == self.orders.len() && seen == self.index_map.len()
    }

    fn levels(&self, side: Side) -> &BTreeMap<Price, PriceLevel> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Consumes liquidity for `order`, bounded by `limit` when given.
    /// Returns the size still unmatched.
    fn match_incoming(&mut self, order: &Order, limit: Option<Price>, fills: &mut Vec<Fill>) -> Quantity {
        let (levels, opposite) = match order.side {
            Side::Bid => (&mut self.asks, Side::Ask), // buy -> match against asks
            Side::Ask => (&mut self.bids, Side::Bid), // sell -> match against bids
        };

        let mut remaining = order.size;
        while remaining > 0 {
            let Some(price) = best_price(levels, opposite) else {
                break;
            };
            if let Some(limit) = limit
                && !crosses(order.side, limit, price)
            {
                break;
            }

            let Some(level) = levels.get_mut(&price) else {
                break;
            };
            let head = level.head;
            let Some(node) = self.orders.get_mut(head) else {
                debug_assert!(false, "level head points at a vacant slot");
                break;
            };

            // Resting order sets the price
            let quantity = remaining.min(node.quantity);
            node.quantity -= quantity;
            level.total_quantity -= quantity;
            remaining -= quantity;

            fills.push(Fill {
                aggressor: order.id,
                resting: node.order_id,
                side: order.side,
                price,
                quantity,
                timestamp: order.timestamp,
            });
            self.total_volume = self.total_volume.saturating_add(quantity);
            self.trade_count = self.trade_count.saturating_add(1);

            if node.quantity == 0 {
                detach(levels, &mut self.orders, &mut self.index_map, price, head);
            }
        }

        remaining
    }

    fn rest(&mut self, order: &Order, quantity: Quantity) -> QueuePosition {
        let levels = match order.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };

        let node_index = self.orders.insert(OrderNode {
            order_id: order.id,
            quantity,
            timestamp: order.timestamp,
            latency: order.latency,
            previous: None,
            next: None,
        });

        let position = match levels.entry(order.price) {
            Entry::Occupied(mut occupied) => {
                let level = occupied.get_mut();
                let tail = level.tail;
                if let Some(tail_node) = self.orders.get_mut(tail) {
                    tail_node.next = Some(node_index);
                }
                if let Some(node) = self.orders.get_mut(node_index) {
                    node.previous = Some(tail);
                }

                level.tail = node_index;
                level.order_count += 1;
                level.total_quantity += quantity;
                QueuePosition {
                    rank: level.order_count - 1,
                    level_size: level.total_quantity,
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PriceLevel {
                    head: node_index,
                    tail: node_index,
                    total_quantity: quantity,
                    order_count: 1,
                });
                QueuePosition {
                    rank: 0,
                    level_size: quantity,
                }
            }
        };

        self.index_map.insert(
            order.id,
            IndexMapEntry {
                order_index: node_index,
                price: order.price,
                side: order.side,
            },
        );

        position
    }
}

fn validate(order: &Order) -> Result<(), InvalidOrder> {
    if order.size == 0 {
        return Err(InvalidOrder::NonPositiveSize);
    }
    if order.size > MAX_ORDER_SIZE {
        return Err(InvalidOrder::SizeOverflow);
    }
    // Written negated so NaN is rejected too
    if !(order.timestamp >= 0.0) {
        return Err(InvalidOrder::NegativeTimestamp);
    }
    if !(order.latency >= 0.0) {
        return Err(InvalidOrder::NegativeLatency);
    }
    Ok(())
}

fn crosses(side: Side, limit: Price, resting: Price) -> bool {
    match side {
        Side::Bid => limit >= resting,
        Side::Ask => limit <= resting,
    }
}

fn best_price(levels: &BTreeMap<Price, PriceLevel>, side: Side) -> Option<Price> {
    let best = match side {
        Side::Bid => levels.last_key_value(),
        Side::Ask => levels.first_key_value(),
    };
    best.map(|(price, _)| *price)
}

fn summarize(levels: &BTreeMap<Price, PriceLevel>, side: Side, depth: usize) -> Vec<LevelSummary> {
    let summary = |(price, level): (&Price, &PriceLevel)| LevelSummary {
        price: *price,
        quantity: level.total_quantity,
        order_count: level.order_count,
    };
    match side {
        Side::Bid => levels.iter().rev().take(depth).map(summary).collect(),
        Side::Ask => levels.iter().take(depth).map(summary).collect(),
    }
}

/// The only way an order leaves the book. Unlinks the node, updates the
/// level aggregates, drops the level once empty, frees the slab slot and
/// removes the index entry.
fn detach(
    levels: &mut BTreeMap<Price, PriceLevel>,
    orders: &mut Slab<OrderNode>,
    index_map: &mut HashMap<OrderId, IndexMapEntry>,
    price: Price,
    node_index: usize,
) -> Option<OrderNode> {
    let level = levels.get_mut(&price)?;

    // Store some local data to get around borrow checker
    let (prev_index, next_index) = orders.get(node_index).map(|node| (node.previous, node.next))?;

    // Update node indices
    if let Some(prev_node) = prev_index.and_then(|prev| orders.get_mut(prev)) {
        prev_node.next = next_index;
    } else {
        level.head = next_index.unwrap_or_default();
    }

    if let Some(next_node) = next_index.and_then(|next| orders.get_mut(next)) {
        next_node.previous = prev_index;
    } else {
        level.tail = prev_index.unwrap_or_default();
    }

    let node = orders.try_remove(node_index)?;

    // Update meta-level things
    level.total_quantity -= node.quantity;
    level.order_count -= 1;

    // Cleanup removed levels & order
    if level.order_count == 0 {
        levels.remove(&price);
    }
    index_map.remove(&node.order_id);

    Some(node)
}

struct PriceLevelIter {
    index: Option<usize>,
}

impl PriceLevelIter {
    pub fn new(price_level: &PriceLevel) -> Self {
        Self {
            index: Some(price_level.head),
        }
    }

    pub fn next<'a>(&mut self, memory: &'a Slab<OrderNode>) -> Option<(usize, &'a OrderNode)> {
        let index = self.index?;
        let node = memory.get(index)?;
        self.index = node.next;
        Some((index, node))
    }
}
