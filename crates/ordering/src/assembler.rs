//! Turns order lines into priced items, deducting stock as it goes.

use chrono::Utc;
use common::{CustomerId, Money, OrderId, ProductId};
use serde::{Deserialize, Serialize};
use stock_store::{
    LowStockThreshold, Order, OrderItem, OrderNumber, Product, ProductIngredient, StockLedger,
    StockTransaction,
};

use crate::deduction::{DeductionEngine, LowStockEvent};
use crate::error::{OrderError, Result};

/// One requested line: a product and how many units of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// An order whose stock has been deducted but which has no number yet.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub order_id: OrderId,
    pub items: Vec<OrderItem>,
    pub total_price: Money,
    /// Alerts to raise once the transaction commits.
    pub low_stock: Vec<LowStockEvent>,
}

impl OrderDraft {
    /// Finalizes the draft into the order row and its pending alerts.
    pub fn into_order(
        self,
        customer_id: CustomerId,
        order_number: OrderNumber,
    ) -> (Order, Vec<LowStockEvent>) {
        let order = Order {
            id: self.order_id,
            customer_id,
            order_number,
            total_price: self.total_price,
            items: self.items,
            created_at: Utc::now(),
        };
        (order, self.low_stock)
    }
}

/// Builds [`OrderDraft`]s inside a caller-owned transaction.
#[derive(Debug, Clone)]
pub struct OrderAssembler<L> {
    engine: DeductionEngine<L>,
}

impl<L: StockLedger> OrderAssembler<L> {
    pub fn new(engine: DeductionEngine<L>) -> Self {
        Self { engine }
    }

    pub fn with_threshold(self, threshold: LowStockThreshold) -> Self {
        Self {
            engine: self.engine.with_threshold(threshold),
        }
    }

    pub fn engine(&self) -> &DeductionEngine<L> {
        &self.engine
    }

    /// Prices every line and deducts the stock it consumes.
    ///
    /// Any failure abandons the whole draft; the caller rolls back `tx`.
    /// Deductions run in ingredient-id order across all lines so two orders
    /// touching the same ingredients always lock them in the same order.
    pub async fn assemble<T: StockTransaction>(
        &self,
        tx: &mut T,
        order_id: OrderId,
        lines: &[OrderLine],
    ) -> Result<OrderDraft> {
        if lines.is_empty() {
            return Err(OrderError::EmptyOrder);
        }

        let mut priced: Vec<(Product, i64, Money)> = Vec::with_capacity(lines.len());
        let mut total_price = Money::zero();

        for line in lines {
            let invalid = || OrderError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            };
            if line.quantity < 1 {
                return Err(invalid());
            }

            let product = tx
                .fetch_product(line.product_id)
                .await?
                .ok_or(OrderError::UnknownProduct(line.product_id))?;

            let line_price = product
                .price
                .checked_multiply(line.quantity)
                .ok_or_else(invalid)?;
            total_price = total_price.checked_add(line_price).ok_or_else(invalid)?;

            priced.push((product, line.quantity, line_price));
        }

        let mut deductions: Vec<(&ProductIngredient, i64)> = priced
            .iter()
            .flat_map(|(product, quantity, _)| {
                product.ingredients.iter().map(move |pi| (pi, *quantity))
            })
            .collect();
        deductions.sort_by_key(|(pi, _)| pi.ingredient_id);

        let mut low_stock = Vec::new();
        for (association, quantity) in deductions {
            let receipt = self.engine.deduct(tx, association, quantity).await?;
            low_stock.extend(receipt.low_stock);
        }

        let items = priced
            .into_iter()
            .map(|(product, quantity, price)| OrderItem {
                order_id,
                product_id: product.id,
                quantity,
                price,
            })
            .collect();

        Ok(OrderDraft {
            order_id,
            items,
            total_price,
            low_stock,
        })
    }
}

#[cfg(test)]
mod tests {
    use common::MerchantId;
    use stock_store::{InMemoryStore, Ingredient, LockingStrategy, Store};

    use super::*;

    struct Catalogue {
        store: InMemoryStore,
        beef: Ingredient,
        cheese: Ingredient,
        burger: Product,
        water: Product,
    }

    async fn catalogue() -> Catalogue {
        let store = InMemoryStore::new();
        let merchant = MerchantId::new();
        let beef = Ingredient::new(merchant, "Beef", 20000).unwrap();
        let cheese = Ingredient::new(merchant, "Cheese", 5000).unwrap();
        store.insert_ingredient(beef.clone()).await.unwrap();
        store.insert_ingredient(cheese.clone()).await.unwrap();

        let burger = Product::new("Burger", Money::from_cents(200))
            .unwrap()
            .with_ingredient(beef.id, 150)
            .unwrap()
            .with_ingredient(cheese.id, 30)
            .unwrap();
        let water = Product::new("Water", Money::from_cents(50)).unwrap();
        store.insert_product(burger.clone()).await.unwrap();
        store.insert_product(water.clone()).await.unwrap();

        Catalogue {
            store,
            beef,
            cheese,
            burger,
            water,
        }
    }

    fn assembler() -> OrderAssembler<LockingStrategy> {
        OrderAssembler::new(DeductionEngine::new(
            LockingStrategy::Pessimistic,
            LowStockThreshold::default(),
        ))
    }

    #[tokio::test]
    async fn prices_lines_and_deducts_every_ingredient() {
        let c = catalogue().await;
        let mut tx = c.store.begin().await.unwrap();

        let draft = assembler()
            .assemble(
                &mut tx,
                OrderId::new(),
                &[OrderLine::new(c.burger.id, 2), OrderLine::new(c.water.id, 3)],
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(draft.total_price, Money::from_cents(550));
        assert_eq!(draft.items.len(), 2);
        assert_eq!(draft.items[0].price, Money::from_cents(400));
        assert_eq!(draft.items[1].price, Money::from_cents(150));
        assert!(draft.items.iter().all(|i| i.order_id == draft.order_id));

        let beef = c.store.ingredient(c.beef.id).await.unwrap();
        let cheese = c.store.ingredient(c.cheese.id).await.unwrap();
        assert_eq!(beef.consumed_quantity, 300);
        assert_eq!(cheese.consumed_quantity, 60);
    }

    #[tokio::test]
    async fn empty_order_is_rejected() {
        let c = catalogue().await;
        let mut tx = c.store.begin().await.unwrap();
        let err = assembler()
            .assemble(&mut tx, OrderId::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::EmptyOrder));
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_before_any_deduction() {
        let c = catalogue().await;
        let mut tx = c.store.begin().await.unwrap();
        let err = assembler()
            .assemble(
                &mut tx,
                OrderId::new(),
                &[OrderLine::new(c.burger.id, 1), OrderLine::new(c.burger.id, 0)],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::InvalidQuantity { quantity: 0, .. }));
        drop(tx);
        assert_eq!(c.store.ingredient(c.beef.id).await.unwrap().consumed_quantity, 0);
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let c = catalogue().await;
        let missing = ProductId::new();
        let mut tx = c.store.begin().await.unwrap();
        let err = assembler()
            .assemble(&mut tx, OrderId::new(), &[OrderLine::new(missing, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::UnknownProduct(id) if id == missing));
    }

    #[tokio::test]
    async fn product_without_ingredients_skips_deduction() {
        let c = catalogue().await;
        let mut tx = c.store.begin().await.unwrap();
        let draft = assembler()
            .assemble(&mut tx, OrderId::new(), &[OrderLine::new(c.water.id, 4)])
            .await
            .unwrap();

        assert_eq!(draft.total_price, Money::from_cents(200));
        assert!(draft.low_stock.is_empty());
    }

    #[tokio::test]
    async fn shortage_abandons_the_whole_draft() {
        let c = catalogue().await;
        let mut tx = c.store.begin().await.unwrap();
        // 170 burgers need 25500 beef and 5100 cheese
        let err = assembler()
            .assemble(&mut tx, OrderId::new(), &[OrderLine::new(c.burger.id, 170)])
            .await
            .unwrap_err();
        tx.rollback().await.unwrap();

        assert!(matches!(err, OrderError::InsufficientStock { .. }));
        assert_eq!(c.store.ingredient(c.cheese.id).await.unwrap().consumed_quantity, 0);
        assert_eq!(c.store.ingredient(c.beef.id).await.unwrap().consumed_quantity, 0);
    }

    #[tokio::test]
    async fn draft_becomes_an_order_with_its_number() {
        let c = catalogue().await;
        let customer = CustomerId::new();
        let mut tx = c.store.begin().await.unwrap();
        let draft = assembler()
            .assemble(&mut tx, OrderId::new(), &[OrderLine::new(c.burger.id, 1)])
            .await
            .unwrap();
        let order_id = draft.order_id;

        let (order, alerts) = draft.into_order(customer, OrderNumber::new(1000));
        assert_eq!(order.id, order_id);
        assert_eq!(order.customer_id, customer);
        assert_eq!(order.order_number, OrderNumber::new(1000));
        assert_eq!(order.total_price, Money::from_cents(200));
        assert!(alerts.is_empty());
    }
}
