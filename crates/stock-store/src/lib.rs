//! Persistence layer for the ordering engine.
//!
//! Holds the ingredient/product/order records, the transactional store
//! contract, the two stock-ledger strategies and the in-memory and
//! PostgreSQL store implementations.

pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{CustomerId, IngredientId, MerchantId, Money, OrderId, ProductId};
pub use error::{Result, StoreError};
pub use ledger::{
    DeductOutcome, Deduction, LockingStrategy, OptimisticLedger, PessimisticLedger, StockLedger,
};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use record::{
    Consumption, Ingredient, LowStockThreshold, Order, OrderItem, OrderNumber, Product,
    ProductIngredient, Version,
};
pub use store::{CatalogueStore, RowLock, StockTransaction, Store};
