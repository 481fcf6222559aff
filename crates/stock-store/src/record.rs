//! Records persisted by the store.

use chrono::{DateTime, Utc};
use common::{CustomerId, IngredientId, MerchantId, Money, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// Row version used for optimistic concurrency control.
///
/// A freshly created ingredient is at version 1 and every write bumps it by 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a newly created row.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-facing order number. Unique and strictly increasing in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(i64);

impl OrderNumber {
    /// Number handed to the very first order when nothing is configured.
    pub const DEFAULT_START: OrderNumber = OrderNumber(1000);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remaining-stock percentage under which an ingredient raises its one-shot alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockThreshold {
    percent: u8,
}

impl LowStockThreshold {
    /// Builds a threshold, clamping the percentage to `0..=100`.
    pub fn from_percent(percent: i64) -> Self {
        Self {
            percent: percent.clamp(0, 100) as u8,
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// True when `remaining` is strictly below `percent` of `stock`.
    pub fn is_breached(&self, remaining: i64, stock: i64) -> bool {
        i128::from(remaining) * 100 < i128::from(stock) * i128::from(self.percent)
    }
}

impl Default for LowStockThreshold {
    fn default() -> Self {
        Self { percent: 50 }
    }
}

/// A consumable resource with finite stock shared across products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: IngredientId,
    pub merchant_id: MerchantId,
    pub name: String,
    pub stock_quantity: i64,
    pub consumed_quantity: i64,
    pub remaining_quantity: i64,
    pub is_notified: bool,
    pub version: Version,
}

/// Result of applying a consumption to an ingredient snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumption {
    /// The consumption fits. `next` is the row to write; `latched` is true when
    /// this write is the one that trips the low-stock alert.
    Applied { next: Ingredient, latched: bool },
    /// Not enough stock left; nothing changes.
    Insufficient { available: i64 },
}

impl Ingredient {
    /// Creates a fresh ingredient with nothing consumed yet.
    pub fn new(merchant_id: MerchantId, name: impl Into<String>, stock_quantity: i64) -> Result<Self> {
        let name = name.into();
        if stock_quantity < 0 {
            return Err(StoreError::InvalidRecord(format!(
                "ingredient {name} has negative stock {stock_quantity}"
            )));
        }

        Ok(Self {
            id: IngredientId::new(),
            merchant_id,
            name,
            stock_quantity,
            consumed_quantity: 0,
            remaining_quantity: stock_quantity,
            is_notified: false,
            version: Version::first(),
        })
    }

    /// Marks `consumed` units as already used, keeping `remaining` in step.
    pub fn with_consumed(mut self, consumed: i64) -> Result<Self> {
        if consumed < 0 || consumed > self.stock_quantity {
            return Err(StoreError::InvalidRecord(format!(
                "ingredient {} cannot have consumed {consumed} of {}",
                self.name, self.stock_quantity
            )));
        }
        self.consumed_quantity = consumed;
        self.remaining_quantity = self.stock_quantity - consumed;
        Ok(self)
    }

    /// Computes the row that results from consuming `amount` units.
    ///
    /// Consumed and remaining move together, the version is bumped and the
    /// low-stock latch is set in the same snapshot when `threshold` is first
    /// breached. The latch is never cleared here.
    pub fn consume(&self, amount: i64, threshold: LowStockThreshold) -> Consumption {
        if amount < 0 || self.remaining_quantity < amount {
            return Consumption::Insufficient {
                available: self.remaining_quantity,
            };
        }

        let mut next = self.clone();
        next.consumed_quantity += amount;
        next.remaining_quantity -= amount;
        next.version = self.version.next();

        let latched = !self.is_notified
            && threshold.is_breached(next.remaining_quantity, next.stock_quantity);
        if latched {
            next.is_notified = true;
        }

        Consumption::Applied { next, latched }
    }
}

/// Amount of one ingredient consumed per unit of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIngredient {
    pub product_id: ProductId,
    pub ingredient_id: IngredientId,
    pub amount: i64,
}

/// A sellable product and its recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub ingredients: Vec<ProductIngredient>,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Money) -> Result<Self> {
        let name = name.into();
        if price.is_negative() {
            return Err(StoreError::InvalidRecord(format!(
                "product {name} has negative price {price}"
            )));
        }

        Ok(Self {
            id: ProductId::new(),
            name,
            price,
            ingredients: Vec::new(),
        })
    }

    /// Adds `amount` units of an ingredient to the recipe.
    pub fn with_ingredient(mut self, ingredient_id: IngredientId, amount: i64) -> Result<Self> {
        if amount < 0 {
            return Err(StoreError::InvalidRecord(format!(
                "product {} needs a non-negative amount of {ingredient_id}, got {amount}",
                self.name
            )));
        }
        if self
            .ingredients
            .iter()
            .any(|pi| pi.ingredient_id == ingredient_id)
        {
            return Err(StoreError::InvalidRecord(format!(
                "product {} already lists ingredient {ingredient_id}",
                self.name
            )));
        }

        self.ingredients.push(ProductIngredient {
            product_id: self.id,
            ingredient_id,
            amount,
        });
        self.ingredients.sort_by_key(|pi| pi.ingredient_id);
        Ok(self)
    }
}

/// A line of a committed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Line total: unit price times quantity.
    pub price: Money,
}

/// A committed order. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub order_number: OrderNumber,
    pub total_price: Money,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingredient(stock: i64, consumed: i64) -> Ingredient {
        Ingredient::new(MerchantId::new(), "Cheese", stock)
            .unwrap()
            .with_consumed(consumed)
            .unwrap()
    }

    #[test]
    fn new_ingredient_has_full_remaining_stock() {
        let cheese = ingredient(500, 0);
        assert_eq!(cheese.remaining_quantity, 500);
        assert_eq!(cheese.version, Version::first());
        assert!(!cheese.is_notified);
    }

    #[test]
    fn negative_stock_is_rejected() {
        let result = Ingredient::new(MerchantId::new(), "Beef", -1);
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
    }

    #[test]
    fn consume_moves_counters_together() {
        let cheese = ingredient(500, 0);
        let Consumption::Applied { next, latched } =
            cheese.consume(20, LowStockThreshold::default())
        else {
            panic!("expected consumption to apply");
        };

        assert_eq!(next.consumed_quantity, 20);
        assert_eq!(next.remaining_quantity, 480);
        assert_eq!(next.version, Version::new(2));
        assert!(!latched);
    }

    #[test]
    fn consume_rejects_overdraw_without_change() {
        let cheese = ingredient(500, 300);
        assert_eq!(
            cheese.consume(300, LowStockThreshold::default()),
            Consumption::Insufficient { available: 200 }
        );
    }

    #[test]
    fn consume_may_drain_to_zero() {
        let cheese = ingredient(10, 0);
        let Consumption::Applied { next, .. } = cheese.consume(10, LowStockThreshold::default())
        else {
            panic!("expected consumption to apply");
        };
        assert_eq!(next.remaining_quantity, 0);
    }

    #[test]
    fn latch_trips_once_when_crossing_threshold() {
        let cheese = ingredient(1000, 490);

        let Consumption::Applied { next, latched } =
            cheese.consume(20, LowStockThreshold::default())
        else {
            panic!("expected consumption to apply");
        };
        assert_eq!(next.remaining_quantity, 490);
        assert!(latched);
        assert!(next.is_notified);

        let Consumption::Applied { next, latched } =
            next.consume(90, LowStockThreshold::default())
        else {
            panic!("expected consumption to apply");
        };
        assert_eq!(next.remaining_quantity, 400);
        assert!(!latched);
        assert!(next.is_notified);
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(LowStockThreshold::from_percent(-5).percent(), 0);
        assert_eq!(LowStockThreshold::from_percent(250).percent(), 100);
        assert!(!LowStockThreshold::from_percent(0).is_breached(0, 100));
        assert!(LowStockThreshold::from_percent(100).is_breached(99, 100));
    }

    #[test]
    fn exactly_at_threshold_is_not_breached() {
        assert!(!LowStockThreshold::default().is_breached(500, 1000));
        assert!(LowStockThreshold::default().is_breached(499, 1000));
    }

    #[test]
    fn product_recipe_rejects_duplicates_and_negative_amounts() {
        let beef = IngredientId::new();
        let product = Product::new("Burger", Money::from_cents(200))
            .unwrap()
            .with_ingredient(beef, 150)
            .unwrap();

        assert!(product.clone().with_ingredient(beef, 10).is_err());
        assert!(product.with_ingredient(IngredientId::new(), -1).is_err());
        assert!(Product::new("Free lunch", Money::from_cents(-1)).is_err());
    }
}
