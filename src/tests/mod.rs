use crate::types::{Order, OrderId, Price, Quantity, Side};

mod impact;

fn limit(id: u64, side: Side, price: Price, size: Quantity) -> Order {
    Order::limit(OrderId(id), side, price, size, 0.0)
}

fn market(id: u64, side: Side, size: Quantity) -> Order {
    Order::market(OrderId(id), side, size, 0.0)
}
