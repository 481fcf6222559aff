//! Order transaction and inventory deduction engine.
//!
//! An order request flows through the [`OrderService`] into the
//! [`OrderController`], which runs each attempt in one store transaction:
//! the [`OrderAssembler`] prices the lines and asks the [`DeductionEngine`]
//! to consume ingredient stock through a [`StockLedger`], then the
//! [`OrderNumberSequencer`] allocates the order number and the order is
//! committed. Transient conflicts are retried under a [`RetryPolicy`].
//! Ingredients that cross their low-stock threshold are reported to a
//! [`LowStockNotifier`] after commit.
//!
//! [`StockLedger`]: stock_store::StockLedger

pub mod assembler;
pub mod config;
pub mod controller;
pub mod deduction;
pub mod error;
pub mod notifier;
pub mod retry;
pub mod sequencer;
pub mod service;
pub mod telemetry;

pub use assembler::{OrderAssembler, OrderDraft, OrderLine};
pub use config::OrderingConfig;
pub use controller::{OrderController, OrderReceipt};
pub use deduction::{DeductionEngine, DeductionReceipt, LowStockEvent};
pub use error::{ErrorCategory, OrderError, Result};
pub use notifier::{
    AlertDispatcher, AlertError, AlertSink, ChannelNotifier, LoggingAlertSink, LowStockNotifier,
    RecordingNotifier,
};
pub use retry::RetryPolicy;
pub use sequencer::OrderNumberSequencer;
pub use service::{
    CreateOrder, ORDER_CREATED_MESSAGE, ORDER_FAILED_MESSAGE, OrderCreated, OrderRejected,
    OrderService,
};
