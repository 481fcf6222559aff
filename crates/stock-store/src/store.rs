use async_trait::async_trait;
use common::{IngredientId, ProductId};

use crate::{Ingredient, Order, OrderNumber, Product, Result, Version};

/// Locking mode for a row read inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    /// Plain read, no lock taken.
    None,
    /// Exclusive row lock held until the transaction commits or rolls back.
    Exclusive,
}

/// One atomic unit of work against the store.
///
/// Every write made through a transaction becomes visible to others only on
/// [`commit`](StockTransaction::commit). Dropping a transaction without
/// committing rolls it back and releases every lock it holds.
#[async_trait]
pub trait StockTransaction: Send {
    /// Reads an ingredient, seeing this transaction's own pending writes.
    async fn fetch_ingredient(
        &mut self,
        id: IngredientId,
        lock: RowLock,
    ) -> Result<Option<Ingredient>>;

    /// Writes the full counter state of `next` (consumed, remaining, latch, version).
    ///
    /// When `expected_version` is set the write only applies if the stored row
    /// is still at that version. Returns whether a row was written.
    async fn write_ingredient(
        &mut self,
        next: &Ingredient,
        expected_version: Option<Version>,
    ) -> Result<bool>;

    /// Loads a product together with its ingredient associations.
    async fn fetch_product(&mut self, id: ProductId) -> Result<Option<Product>>;

    /// Locks the order-number counter and returns the last allocated number.
    ///
    /// Returns None if no number was ever allocated.
    async fn lock_order_sequence(&mut self) -> Result<Option<OrderNumber>>;

    /// Records `number` as the last allocated order number.
    ///
    /// Must be called after [`lock_order_sequence`](StockTransaction::lock_order_sequence).
    async fn store_order_number(&mut self, number: OrderNumber) -> Result<()>;

    /// Inserts an order and its items.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Makes every write of this transaction durable and visible.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;
}

/// Entry point to a transactional store.
#[async_trait]
pub trait Store: Send + Sync {
    type Transaction: StockTransaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Transaction>;
}

/// Catalogue maintenance outside the order flow: seeding and inspection.
#[async_trait]
pub trait CatalogueStore: Send + Sync {
    /// Adds an ingredient. Names must be unique.
    async fn add_ingredient(&self, ingredient: Ingredient) -> Result<()>;

    /// Adds a product. Every ingredient in its recipe must already exist.
    async fn add_product(&self, product: Product) -> Result<()>;

    /// Loads the committed state of an ingredient.
    async fn load_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>>;

    /// Counts committed orders.
    async fn count_orders(&self) -> Result<u64>;
}
