//! Order number allocation.

use stock_store::{OrderNumber, StockTransaction};

use crate::error::Result;

/// Hands out strictly increasing, gap-free order numbers.
///
/// Allocation locks the store's order counter for the rest of the
/// transaction, so concurrent orders are numbered in commit order and a
/// rolled-back attempt gives its number back.
#[derive(Debug, Clone, Copy)]
pub struct OrderNumberSequencer {
    starting: OrderNumber,
}

impl OrderNumberSequencer {
    /// Creates a sequencer whose first number is `starting`.
    pub fn new(starting: OrderNumber) -> Self {
        Self { starting }
    }

    pub fn starting(&self) -> OrderNumber {
        self.starting
    }

    /// Allocates the next order number inside `tx`.
    pub async fn next_order_number<T: StockTransaction>(&self, tx: &mut T) -> Result<OrderNumber> {
        let next = match tx.lock_order_sequence().await? {
            Some(last) => last.next(),
            None => self.starting,
        };
        tx.store_order_number(next).await?;
        Ok(next)
    }
}

impl Default for OrderNumberSequencer {
    fn default() -> Self {
        Self::new(OrderNumber::DEFAULT_START)
    }
}
