//! Property tests for the matching engine and the simulator.
//!
//! Random operation sequences run against both [`OrderBook`] and a naive
//! vector-backed book; the two must produce identical fills.

use proptest::prelude::*;
use sim_book::{
    MarketSimulator, SimulationConfig,
    orderbook::OrderBook,
    types::{Order, OrderId, Price, Quantity, Side},
};

#[derive(Debug, Clone)]
enum Op {
    Limit { side: Side, price: Price, size: Quantity },
    Market { side: Side, size: Quantity },
    Cancel { pick: usize },
}

fn arb_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Bid), Just(Side::Ask)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (arb_side(), 90i64..110, 1u64..50).prop_map(|(side, price, size)| Op::Limit { side, price, size }),
        2 => (arb_side(), 1u64..80).prop_map(|(side, size)| Op::Market { side, size }),
        2 => any::<usize>().prop_map(|pick| Op::Cancel { pick }),
    ]
}

/// Resting order in the reference book; `sequence` is arrival order.
#[derive(Debug, Clone)]
struct Resting {
    id: OrderId,
    side: Side,
    price: Price,
    size: Quantity,
    sequence: u64,
}

/// Linear-scan book with the same matching rules.
#[derive(Debug, Default)]
struct NaiveBook {
    resting: Vec<Resting>,
    sequence: u64,
}

impl NaiveBook {
    /// Returns `(resting id, price, quantity)` per fill and the unmatched size.
    fn execute(&mut self, side: Side, limit: Option<Price>, mut size: Quantity) -> (Vec<(OrderId, Price, Quantity)>, Quantity) {
        let mut fills = Vec::new();
        while size > 0 {
            let best = self
                .resting
                .iter()
                .enumerate()
                .filter(|(_, order)| order.side != side)
                .filter(|(_, order)| match (side, limit) {
                    (_, None) => true,
                    (Side::Bid, Some(limit)) => order.price <= limit,
                    (Side::Ask, Some(limit)) => order.price >= limit,
                })
                .min_by_key(|(_, order)| {
                    let price = match side {
                        Side::Bid => order.price,
                        Side::Ask => -order.price,
                    };
                    (price, order.sequence)
                })
                .map(|(index, _)| index);
            let Some(index) = best else { break };

            let order = &mut self.resting[index];
            let quantity = size.min(order.size);
            order.size -= quantity;
            size -= quantity;
            fills.push((order.id, order.price, quantity));
            if order.size == 0 {
                self.resting.remove(index);
            }
        }
        (fills, size)
    }

    fn rest(&mut self, id: OrderId, side: Side, price: Price, size: Quantity) {
        self.sequence += 1;
        self.resting.push(Resting {
            id,
            side,
            price,
            size,
            sequence: self.sequence,
        });
    }

    fn cancel(&mut self, id: OrderId) -> Option<Quantity> {
        let index = self.resting.iter().position(|order| order.id == id)?;
        Some(self.resting.remove(index).size)
    }
}

fn resting_quantity(book: &OrderBook) -> Quantity {
    let depth = book.snapshot(usize::MAX);
    depth.bids.iter().chain(&depth.asks).map(|level| level.quantity).sum()
}

proptest! {
    #[test]
    fn prop_matches_naive_book(ops in prop::collection::vec(arb_op(), 1..200)) {
        let mut book = OrderBook::new();
        let mut naive = NaiveBook::default();
        let mut issued: Vec<OrderId> = Vec::new();

        for (index, op) in ops.into_iter().enumerate() {
            let id = OrderId(index as u64 + 1);
            match op {
                Op::Limit { side, price, size } => {
                    let outcome = book.submit_limit(Order::limit(id, side, price, size, 0.0)).unwrap();
                    let (expected, left) = naive.execute(side, Some(price), size);
                    if left > 0 {
                        naive.rest(id, side, price, left);
                    }

                    let actual: Vec<_> = outcome.fills.iter().map(|fill| (fill.resting, fill.price, fill.quantity)).collect();
                    prop_assert_eq!(actual, expected);
                    prop_assert_eq!(outcome.resting.is_some(), left > 0);
                    issued.push(id);
                }
                Op::Market { side, size } => {
                    let outcome = book.submit_market(Order::market(id, side, size, 0.0)).unwrap();
                    let (expected, left) = naive.execute(side, None, size);

                    let actual: Vec<_> = outcome.fills.iter().map(|fill| (fill.resting, fill.price, fill.quantity)).collect();
                    prop_assert_eq!(actual, expected);
                    prop_assert_eq!(outcome.unfilled, left);
                }
                Op::Cancel { pick } => {
                    if issued.is_empty() {
                        continue;
                    }
                    let target = issued[pick % issued.len()];
                    prop_assert_eq!(book.cancel(target).ok(), naive.cancel(target));
                }
            }

            prop_assert!(book.is_consistent());
            if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
                prop_assert!(bid < ask);
            }
        }
    }

    #[test]
    fn prop_quantity_is_conserved(ops in prop::collection::vec(arb_op(), 1..200)) {
        let mut book = OrderBook::new();
        let mut issued: Vec<OrderId> = Vec::new();
        let mut submitted: Quantity = 0;
        let mut removed: Quantity = 0;

        for (index, op) in ops.into_iter().enumerate() {
            let id = OrderId(index as u64 + 1);
            match op {
                Op::Limit { side, price, size } => {
                    let outcome = book.submit_limit(Order::limit(id, side, price, size, 0.0)).unwrap();
                    let traded: Quantity = outcome.fills.iter().map(|fill| fill.quantity).sum();
                    // The aggressor's traded part never rests, the resting side loses the same amount
                    submitted += size;
                    removed += 2 * traded;
                    issued.push(id);
                }
                Op::Market { side, size } => {
                    let outcome = book.submit_market(Order::market(id, side, size, 0.0)).unwrap();
                    let traded: Quantity = outcome.fills.iter().map(|fill| fill.quantity).sum();
                    prop_assert_eq!(traded + outcome.unfilled, size);
                    removed += traded;
                }
                Op::Cancel { pick } => {
                    if let Some(&target) = issued.get(pick % issued.len().max(1)) {
                        removed += book.cancel(target).unwrap_or(0);
                    }
                }
            }
            prop_assert_eq!(resting_quantity(&book), submitted - removed);
        }
    }

    #[test]
    fn prop_market_fills_walk_away_from_touch(
        levels in prop::collection::vec((90i64..110, 1u64..50), 1..40),
        side in arb_side(),
        size in 1u64..500,
    ) {
        let mut book = OrderBook::new();
        for (index, (price, quantity)) in levels.into_iter().enumerate() {
            book.submit_limit(Order::limit(OrderId(index as u64 + 1), side.opposite(), price, quantity, 0.0)).unwrap();
        }

        let outcome = book.submit_market(Order::market(OrderId(1_000), side, size, 0.0)).unwrap();
        for pair in outcome.fills.windows(2) {
            match side {
                Side::Bid => prop_assert!(pair[0].price <= pair[1].price),
                Side::Ask => prop_assert!(pair[0].price >= pair[1].price),
            }
            // Same price means earlier arrival first
            if pair[0].price == pair[1].price {
                prop_assert!(pair[0].resting < pair[1].resting);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_simulation_is_deterministic(seed in any::<u64>(), steps in 1usize..20) {
        let config = SimulationConfig::default().with_seed(seed);
        let mut first = MarketSimulator::new(config.clone()).unwrap();
        let mut second = MarketSimulator::new(config).unwrap();

        for _ in 0..steps {
            prop_assert_eq!(first.step(0.5), second.step(0.5));
        }
        prop_assert!(first.book().is_consistent());
    }
}
