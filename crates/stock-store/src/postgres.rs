use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, IngredientId, MerchantId, Money, OrderId, ProductId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::store::{CatalogueStore, RowLock, StockTransaction, Store};
use crate::{
    Ingredient, Order, OrderItem, OrderNumber, Product, ProductIngredient, Result, StoreError,
    Version,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const INGREDIENT_COLUMNS: &str = "id, merchant_id, name, stock_quantity, consumed_quantity, remaining_quantity, is_notified, version";

/// PostgreSQL-backed store implementation.
///
/// Exclusive row locks are `SELECT ... FOR UPDATE`; conditional writes are
/// `UPDATE ... WHERE version = $n`. Every transaction sets `lock_timeout` so a
/// blocked lock wait turns into a retryable conflict.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long a transaction waits for a row lock before giving up.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts a new ingredient. Names must be unique.
    pub async fn insert_ingredient(&self, ingredient: &Ingredient) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingredients (id, merchant_id, name, stock_quantity, consumed_quantity, remaining_quantity, is_notified, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(ingredient.id.as_uuid())
        .bind(ingredient.merchant_id.as_uuid())
        .bind(&ingredient.name)
        .bind(ingredient.stock_quantity)
        .bind(ingredient.consumed_quantity)
        .bind(ingredient.remaining_quantity)
        .bind(ingredient.is_notified)
        .bind(ingredient.version.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a product and its recipe in one transaction.
    pub async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO products (id, name, price_cents) VALUES ($1, $2, $3)")
            .bind(product.id.as_uuid())
            .bind(&product.name)
            .bind(product.price.cents())
            .execute(&mut *tx)
            .await?;

        for pi in &product.ingredients {
            sqlx::query(
                "INSERT INTO product_ingredients (product_id, ingredient_id, amount) VALUES ($1, $2, $3)",
            )
            .bind(product.id.as_uuid())
            .bind(pi.ingredient_id.as_uuid())
            .bind(pi.amount)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns the committed state of an ingredient.
    pub async fn ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>> {
        let row = sqlx::query(&format!(
            "SELECT {INGREDIENT_COLUMNS} FROM ingredients WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_ingredient).transpose()
    }

    /// Returns all committed orders ordered by order number.
    pub async fn orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, order_number, total_price_cents, created_at
            FROM orders
            ORDER BY order_number ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let mut order = row_to_order(row)?;
            let items = sqlx::query(
                "SELECT order_id, product_id, quantity, price_cents FROM order_items WHERE order_id = $1",
            )
            .bind(order.id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
            order.items = items
                .into_iter()
                .map(row_to_order_item)
                .collect::<Result<_>>()?;
            orders.push(order);
        }

        Ok(orders)
    }
}

#[async_trait]
impl CatalogueStore for PostgresStore {
    async fn add_ingredient(&self, ingredient: Ingredient) -> Result<()> {
        self.insert_ingredient(&ingredient).await
    }

    async fn add_product(&self, product: Product) -> Result<()> {
        self.insert_product(&product).await
    }

    async fn load_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>> {
        self.ingredient(id).await
    }

    async fn count_orders(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM orders")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let mut tx = self.pool.begin().await?;

        // SET does not accept bind parameters.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(PostgresTransaction { tx })
    }
}

/// Transaction over a [`PostgresStore`].
///
/// Dropping it without commit rolls back on the connection.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StockTransaction for PostgresTransaction {
    async fn fetch_ingredient(
        &mut self,
        id: IngredientId,
        lock: RowLock,
    ) -> Result<Option<Ingredient>> {
        let suffix = match lock {
            RowLock::None => "",
            RowLock::Exclusive => " FOR UPDATE",
        };
        let row = sqlx::query(&format!(
            "SELECT {INGREDIENT_COLUMNS} FROM ingredients WHERE id = $1{suffix}"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_ingredient).transpose()
    }

    async fn write_ingredient(
        &mut self,
        next: &Ingredient,
        expected_version: Option<Version>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ingredients
            SET consumed_quantity = $2,
                remaining_quantity = $3,
                is_notified = $4,
                version = $5,
                updated_at = now()
            WHERE id = $1 AND ($6::BIGINT IS NULL OR version = $6)
            "#,
        )
        .bind(next.id.as_uuid())
        .bind(next.consumed_quantity)
        .bind(next.remaining_quantity)
        .bind(next.is_notified)
        .bind(next.version.as_i64())
        .bind(expected_version.map(|v| v.as_i64()))
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_product(&mut self, id: ProductId) -> Result<Option<Product>> {
        let Some(row) = sqlx::query("SELECT id, name, price_cents FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
        else {
            return Ok(None);
        };

        let ingredient_rows = sqlx::query(
            r#"
            SELECT ingredient_id, amount
            FROM product_ingredients
            WHERE product_id = $1
            ORDER BY ingredient_id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        let ingredients = ingredient_rows
            .into_iter()
            .map(|row| -> Result<ProductIngredient> {
                Ok(ProductIngredient {
                    product_id: id,
                    ingredient_id: IngredientId::from_uuid(row.try_get::<Uuid, _>("ingredient_id")?),
                    amount: row.try_get("amount")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            ingredients,
        }))
    }

    async fn lock_order_sequence(&mut self) -> Result<Option<OrderNumber>> {
        let row = sqlx::query("SELECT last_number FROM order_sequence WHERE id = 1 FOR UPDATE")
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "order_sequence",
                id: "1".to_string(),
            })?;

        let last: Option<i64> = row.try_get("last_number")?;
        Ok(last.map(OrderNumber::new))
    }

    async fn store_order_number(&mut self, number: OrderNumber) -> Result<()> {
        sqlx::query("UPDATE order_sequence SET last_number = $1 WHERE id = 1")
            .bind(number.as_i64())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, order_number, total_price_cents, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.customer_id.as_uuid())
        .bind(order.order_number.as_i64())
        .bind(order.total_price.cents())
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, price_cents)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(item.order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(item.quantity)
            .bind(item.price.cents())
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(|e| {
            let err = StoreError::from(e);
            if err.is_conflict() {
                metrics::counter!("stock_store_conflicts_total", "entity" => "transaction")
                    .increment(1);
            }
            err
        })
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn row_to_ingredient(row: PgRow) -> Result<Ingredient> {
    Ok(Ingredient {
        id: IngredientId::from_uuid(row.try_get::<Uuid, _>("id")?),
        merchant_id: MerchantId::from_uuid(row.try_get::<Uuid, _>("merchant_id")?),
        name: row.try_get("name")?,
        stock_quantity: row.try_get("stock_quantity")?,
        consumed_quantity: row.try_get("consumed_quantity")?,
        remaining_quantity: row.try_get("remaining_quantity")?,
        is_notified: row.try_get("is_notified")?,
        version: Version::new(row.try_get("version")?),
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
        order_number: OrderNumber::new(row.try_get("order_number")?),
        total_price: Money::from_cents(row.try_get("total_price_cents")?),
        items: Vec::new(),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn row_to_order_item(row: PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity: row.try_get("quantity")?,
        price: Money::from_cents(row.try_get("price_cents")?),
    })
}
