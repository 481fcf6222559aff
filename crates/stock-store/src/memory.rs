use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{IngredientId, ProductId};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::store::{CatalogueStore, RowLock, StockTransaction, Store};
use crate::{Ingredient, Order, OrderNumber, Product, Result, StoreError, Version};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

struct IngredientRow {
    record: Ingredient,
    lock: Arc<Mutex<()>>,
}

#[derive(Default)]
struct Tables {
    ingredients: HashMap<IngredientId, IngredientRow>,
    products: HashMap<ProductId, Product>,
    orders: Vec<Order>,
    last_order_number: Option<OrderNumber>,
}

#[derive(Default)]
struct Faults {
    commit_conflicts: AtomicU32,
    unavailable: AtomicBool,
    transactions_started: AtomicU64,
}

/// In-memory store implementation for testing and local runs.
///
/// Behaves like the PostgreSQL store: exclusive row locks are async mutexes
/// held until the transaction ends, writes are buffered and applied
/// atomically on commit, and commit re-checks every written row's version.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    sequence_lock: Arc<Mutex<()>>,
    lock_timeout: Duration,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            sequence_lock: Arc::new(Mutex::new(())),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Sets how long a transaction waits for a row lock before giving up.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Inserts a new ingredient. Names must be unique.
    pub async fn insert_ingredient(&self, ingredient: Ingredient) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .ingredients
            .values()
            .any(|row| row.record.name == ingredient.name || row.record.id == ingredient.id)
        {
            return Err(StoreError::InvalidRecord(format!(
                "ingredient {} already exists",
                ingredient.name
            )));
        }

        tables.ingredients.insert(
            ingredient.id,
            IngredientRow {
                record: ingredient,
                lock: Arc::new(Mutex::new(())),
            },
        );
        Ok(())
    }

    /// Inserts a product. Every ingredient in its recipe must already exist.
    pub async fn insert_product(&self, product: Product) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(missing) = product
            .ingredients
            .iter()
            .find(|pi| !tables.ingredients.contains_key(&pi.ingredient_id))
        {
            return Err(StoreError::NotFound {
                entity: "ingredient",
                id: missing.ingredient_id.to_string(),
            });
        }

        tables.products.insert(product.id, product);
        Ok(())
    }

    /// Returns the committed state of an ingredient.
    pub async fn ingredient(&self, id: IngredientId) -> Option<Ingredient> {
        let tables = self.tables.read().await;
        tables.ingredients.get(&id).map(|row| row.record.clone())
    }

    /// Returns all committed orders in commit order.
    pub async fn orders(&self) -> Vec<Order> {
        self.tables.read().await.orders.clone()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    pub async fn last_order_number(&self) -> Option<OrderNumber> {
        self.tables.read().await.last_order_number
    }

    /// Makes the next `count` commits fail with a write conflict.
    pub fn fail_next_commits(&self, count: u32) {
        self.faults.commit_conflicts.store(count, Ordering::SeqCst);
    }

    /// Simulates loss of connectivity: `begin` fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns how many transactions were opened so far.
    pub fn transactions_started(&self) -> u64 {
        self.faults.transactions_started.load(Ordering::SeqCst)
    }

    fn take_injected_conflict(&self) -> bool {
        self.faults
            .commit_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        self.faults
            .transactions_started
            .fetch_add(1, Ordering::SeqCst);

        Ok(InMemoryTransaction {
            store: self.clone(),
            ingredient_writes: HashMap::new(),
            order_inserts: Vec::new(),
            allocated_number: None,
            row_guards: HashMap::new(),
            sequence_guard: None,
        })
    }
}

#[async_trait]
impl CatalogueStore for InMemoryStore {
    async fn add_ingredient(&self, ingredient: Ingredient) -> Result<()> {
        self.insert_ingredient(ingredient).await
    }

    async fn add_product(&self, product: Product) -> Result<()> {
        self.insert_product(product).await
    }

    async fn load_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>> {
        Ok(self.ingredient(id).await)
    }

    async fn count_orders(&self) -> Result<u64> {
        Ok(self.order_count().await as u64)
    }
}

struct PendingWrite {
    /// Committed version the first write of this transaction was based on.
    base_version: Version,
    next: Ingredient,
}

/// Transaction over an [`InMemoryStore`].
///
/// Holds its row and sequence locks until commit, rollback or drop.
pub struct InMemoryTransaction {
    store: InMemoryStore,
    ingredient_writes: HashMap<IngredientId, PendingWrite>,
    order_inserts: Vec<Order>,
    allocated_number: Option<OrderNumber>,
    row_guards: HashMap<IngredientId, OwnedMutexGuard<()>>,
    sequence_guard: Option<OwnedMutexGuard<()>>,
}

impl InMemoryTransaction {
    async fn acquire(&self, lock: Arc<Mutex<()>>, entity: &'static str) -> Result<OwnedMutexGuard<()>> {
        let timeout = self.store.lock_timeout;
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::conflict(entity, format!("lock wait exceeded {timeout:?}")))
    }
}

#[async_trait]
impl StockTransaction for InMemoryTransaction {
    async fn fetch_ingredient(
        &mut self,
        id: IngredientId,
        lock: RowLock,
    ) -> Result<Option<Ingredient>> {
        if lock == RowLock::Exclusive && !self.row_guards.contains_key(&id) {
            let row_lock = {
                let tables = self.store.tables.read().await;
                match tables.ingredients.get(&id) {
                    Some(row) => row.lock.clone(),
                    None => return Ok(None),
                }
            };
            let guard = self.acquire(row_lock, "ingredient").await?;
            self.row_guards.insert(id, guard);
        }

        if let Some(pending) = self.ingredient_writes.get(&id) {
            return Ok(Some(pending.next.clone()));
        }

        let tables = self.store.tables.read().await;
        Ok(tables.ingredients.get(&id).map(|row| row.record.clone()))
    }

    async fn write_ingredient(
        &mut self,
        next: &Ingredient,
        expected_version: Option<Version>,
    ) -> Result<bool> {
        let committed_version = {
            let tables = self.store.tables.read().await;
            match tables.ingredients.get(&next.id) {
                Some(row) => row.record.version,
                None => return Ok(false),
            }
        };

        let (base_version, current_version) = match self.ingredient_writes.get(&next.id) {
            Some(pending) => (pending.base_version, pending.next.version),
            None => (committed_version, committed_version),
        };

        if let Some(expected) = expected_version
            && (expected != current_version || base_version != committed_version)
        {
            return Ok(false);
        }

        self.ingredient_writes.insert(
            next.id,
            PendingWrite {
                base_version,
                next: next.clone(),
            },
        );
        Ok(true)
    }

    async fn fetch_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        let tables = self.store.tables.read().await;
        Ok(tables.products.get(&id).cloned())
    }

    async fn lock_order_sequence(&mut self) -> Result<Option<OrderNumber>> {
        if self.sequence_guard.is_none() {
            let guard = self
                .acquire(self.store.sequence_lock.clone(), "order_sequence")
                .await?;
            self.sequence_guard = Some(guard);
        }

        if self.allocated_number.is_some() {
            return Ok(self.allocated_number);
        }
        Ok(self.store.tables.read().await.last_order_number)
    }

    async fn store_order_number(&mut self, number: OrderNumber) -> Result<()> {
        if self.sequence_guard.is_none() {
            return Err(StoreError::InvalidRecord(
                "order sequence must be locked before storing a number".to_string(),
            ));
        }
        self.allocated_number = Some(number);
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.order_inserts.push(order.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        if self.store.take_injected_conflict() {
            metrics::counter!("stock_store_conflicts_total", "entity" => "transaction")
                .increment(1);
            return Err(StoreError::conflict("transaction", "injected commit conflict"));
        }

        let mut tables = self.store.tables.write().await;

        for (id, pending) in &self.ingredient_writes {
            let row = tables.ingredients.get(id).ok_or_else(|| StoreError::NotFound {
                entity: "ingredient",
                id: id.to_string(),
            })?;
            if row.record.version != pending.base_version {
                metrics::counter!("stock_store_conflicts_total", "entity" => "ingredient")
                    .increment(1);
                return Err(StoreError::conflict(
                    "ingredient",
                    format!(
                        "{} moved from version {} to {}",
                        row.record.name, pending.base_version, row.record.version
                    ),
                ));
            }
        }

        for order in &self.order_inserts {
            if tables
                .orders
                .iter()
                .any(|o| o.order_number == order.order_number)
            {
                return Err(StoreError::conflict(
                    "order",
                    format!("order number {} already allocated", order.order_number),
                ));
            }
        }

        for (id, pending) in self.ingredient_writes {
            if let Some(row) = tables.ingredients.get_mut(&id) {
                row.record = pending.next;
            }
        }
        tables.orders.extend(self.order_inserts);
        if let Some(number) = self.allocated_number {
            tables.last_order_number = Some(number);
        }

        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        tracing::debug!(
            pending_writes = self.ingredient_writes.len(),
            "rolling back in-memory transaction"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{CustomerId, MerchantId, Money, OrderId};

    use super::*;
    use crate::LowStockThreshold;
    use crate::record::Consumption;

    async fn store_with_beef(stock: i64) -> (InMemoryStore, Ingredient) {
        let store = InMemoryStore::new();
        let beef = Ingredient::new(MerchantId::new(), "Beef", stock).unwrap();
        store.insert_ingredient(beef.clone()).await.unwrap();
        (store, beef)
    }

    fn consumed(ingredient: &Ingredient, amount: i64) -> Ingredient {
        match ingredient.consume(amount, LowStockThreshold::default()) {
            Consumption::Applied { next, .. } => next,
            Consumption::Insufficient { .. } => panic!("expected enough stock"),
        }
    }

    fn order(number: i64) -> Order {
        Order {
            id: OrderId::new(),
            customer_id: CustomerId::new(),
            order_number: OrderNumber::new(number),
            total_price: Money::from_cents(200),
            items: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_ingredient_name_is_rejected() {
        let (store, _) = store_with_beef(10).await;
        let again = Ingredient::new(MerchantId::new(), "Beef", 5).unwrap();
        assert!(matches!(
            store.insert_ingredient(again).await,
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[tokio::test]
    async fn product_with_unknown_ingredient_is_rejected() {
        let store = InMemoryStore::new();
        let product = Product::new("Burger", Money::from_cents(200))
            .unwrap()
            .with_ingredient(IngredientId::new(), 1)
            .unwrap();
        assert!(matches!(
            store.insert_product(product).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let (store, beef) = store_with_beef(100).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.write_ingredient(&consumed(&beef, 40), None).await.unwrap());

        let own_view = tx.fetch_ingredient(beef.id, RowLock::None).await.unwrap().unwrap();
        assert_eq!(own_view.remaining_quantity, 60);
        assert_eq!(store.ingredient(beef.id).await.unwrap().remaining_quantity, 100);

        tx.commit().await.unwrap();
        assert_eq!(store.ingredient(beef.id).await.unwrap().remaining_quantity, 60);
    }

    #[tokio::test]
    async fn rollback_discards_everything() {
        let (store, beef) = store_with_beef(100).await;

        let mut tx = store.begin().await.unwrap();
        tx.write_ingredient(&consumed(&beef, 40), None).await.unwrap();
        tx.lock_order_sequence().await.unwrap();
        tx.store_order_number(OrderNumber::new(1000)).await.unwrap();
        tx.insert_order(&order(1000)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.ingredient(beef.id).await.unwrap().remaining_quantity, 100);
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.last_order_number().await, None);
    }

    #[tokio::test]
    async fn dropping_a_transaction_releases_its_locks() {
        let store = InMemoryStore::new().with_lock_timeout(Duration::from_millis(50));
        let beef = Ingredient::new(MerchantId::new(), "Beef", 10).unwrap();
        store.insert_ingredient(beef.clone()).await.unwrap();

        {
            let mut abandoned = store.begin().await.unwrap();
            abandoned
                .fetch_ingredient(beef.id, RowLock::Exclusive)
                .await
                .unwrap();
            abandoned.lock_order_sequence().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .fetch_ingredient(beef.id, RowLock::Exclusive)
            .await
            .unwrap()
            .is_some());
        assert_eq!(tx.lock_order_sequence().await.unwrap(), None);
    }

    #[tokio::test]
    async fn conditional_write_fails_on_stale_version() {
        let (store, beef) = store_with_beef(100).await;

        let mut tx = store.begin().await.unwrap();
        let written = tx
            .write_ingredient(&consumed(&beef, 10), Some(Version::new(7)))
            .await
            .unwrap();
        assert!(!written);
    }

    #[tokio::test]
    async fn sequence_is_shared_between_transactions_after_commit() {
        let store = InMemoryStore::new();

        let mut first = store.begin().await.unwrap();
        assert_eq!(first.lock_order_sequence().await.unwrap(), None);
        first.store_order_number(OrderNumber::new(1000)).await.unwrap();
        first.insert_order(&order(1000)).await.unwrap();
        first.commit().await.unwrap();

        let mut second = store.begin().await.unwrap();
        assert_eq!(
            second.lock_order_sequence().await.unwrap(),
            Some(OrderNumber::new(1000))
        );
    }

    #[tokio::test]
    async fn storing_a_number_requires_the_sequence_lock() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.store_order_number(OrderNumber::new(1)).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_order_number_conflicts_on_commit() {
        let store = InMemoryStore::new();

        let mut first = store.begin().await.unwrap();
        first.insert_order(&order(1000)).await.unwrap();
        first.commit().await.unwrap();

        let mut second = store.begin().await.unwrap();
        second.insert_order(&order(1000)).await.unwrap();
        assert!(second.commit().await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed_one_by_one() {
        let store = InMemoryStore::new();
        store.fail_next_commits(2);

        for _ in 0..2 {
            let tx = store.begin().await.unwrap();
            assert!(tx.commit().await.unwrap_err().is_conflict());
        }
        let tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.transactions_started(), 3);
    }

    #[tokio::test]
    async fn unavailable_store_refuses_transactions() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.begin().await, Err(StoreError::Unavailable(_))));
    }
}
