//! Inbound order API.
//!
//! Wraps the [`OrderController`] and turns its result into the caller-facing
//! shapes: a success message with the receipt, or a generic failure message
//! with a coarse category. Internal error detail is logged, not returned.

use common::{CustomerId, ProductId};
use serde::{Deserialize, Serialize};
use stock_store::{StockLedger, Store};
use thiserror::Error;

use crate::assembler::OrderLine;
use crate::controller::{OrderController, OrderReceipt};
use crate::error::ErrorCategory;
use crate::notifier::LowStockNotifier;

pub const ORDER_CREATED_MESSAGE: &str = "order created successfully";
pub const ORDER_FAILED_MESSAGE: &str = "failed to create order";

/// Command to create an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
}

impl CreateOrder {
    pub fn new(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            lines: Vec::new(),
        }
    }

    /// Adds a product line.
    pub fn with_line(mut self, product_id: ProductId, quantity: i64) -> Self {
        self.lines.push(OrderLine::new(product_id, quantity));
        self
    }
}

/// Successful order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order: OrderReceipt,
    pub message: String,
}

/// Failed order creation as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{error} ({category})")]
pub struct OrderRejected {
    pub category: ErrorCategory,
    pub error: String,
}

/// Service for creating orders.
pub struct OrderService<S, L, N> {
    controller: OrderController<S, L, N>,
}

impl<S, L, N> OrderService<S, L, N>
where
    S: Store,
    L: StockLedger,
    N: LowStockNotifier,
{
    pub fn new(controller: OrderController<S, L, N>) -> Self {
        Self { controller }
    }

    /// Returns a reference to the underlying controller.
    pub fn controller(&self) -> &OrderController<S, L, N> {
        &self.controller
    }

    /// Creates an order for a customer.
    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<OrderCreated, OrderRejected> {
        match self
            .controller
            .place_order(cmd.customer_id, &cmd.lines)
            .await
        {
            Ok(order) => Ok(OrderCreated {
                order,
                message: ORDER_CREATED_MESSAGE.to_string(),
            }),
            Err(err) => Err(OrderRejected {
                category: err.category(),
                error: ORDER_FAILED_MESSAGE.to_string(),
            }),
        }
    }
}
