//! Demo catalogue: one burger made of beef, cheese and onion.

use common::{IngredientId, MerchantId, Money, ProductId};
use stock_store::{CatalogueStore, Ingredient, Product};

pub const BEEF_STOCK: i64 = 20_000;
pub const CHEESE_STOCK: i64 = 5_000;
pub const ONION_STOCK: i64 = 1_000;

pub const BEEF_PER_BURGER: i64 = 150;
pub const CHEESE_PER_BURGER: i64 = 30;
pub const ONION_PER_BURGER: i64 = 20;

pub const BURGER_PRICE_CENTS: i64 = 200;

/// Identifiers of the seeded records.
#[derive(Debug, Clone, Copy)]
pub struct DemoCatalogue {
    pub merchant_id: MerchantId,
    pub beef: IngredientId,
    pub cheese: IngredientId,
    pub onion: IngredientId,
    pub burger: ProductId,
}

impl DemoCatalogue {
    /// Every ingredient with the amount one burger consumes.
    pub fn recipe(&self) -> [(IngredientId, i64); 3] {
        [
            (self.beef, BEEF_PER_BURGER),
            (self.cheese, CHEESE_PER_BURGER),
            (self.onion, ONION_PER_BURGER),
        ]
    }
}

/// Inserts the demo catalogue into `store`.
///
/// Ingredient names are unique, so seeding a store twice fails.
pub async fn seed<C: CatalogueStore>(store: &C) -> stock_store::Result<DemoCatalogue> {
    let merchant_id = MerchantId::new();
    let beef = Ingredient::new(merchant_id, "Beef", BEEF_STOCK)?;
    let cheese = Ingredient::new(merchant_id, "Cheese", CHEESE_STOCK)?;
    let onion = Ingredient::new(merchant_id, "Onion", ONION_STOCK)?;

    let burger = Product::new("Burger", Money::from_cents(BURGER_PRICE_CENTS))?
        .with_ingredient(beef.id, BEEF_PER_BURGER)?
        .with_ingredient(cheese.id, CHEESE_PER_BURGER)?
        .with_ingredient(onion.id, ONION_PER_BURGER)?;

    let catalogue = DemoCatalogue {
        merchant_id,
        beef: beef.id,
        cheese: cheese.id,
        onion: onion.id,
        burger: burger.id,
    };

    store.add_ingredient(beef).await?;
    store.add_ingredient(cheese).await?;
    store.add_ingredient(onion).await?;
    store.add_product(burger).await?;

    tracing::info!(
        merchant_id = %catalogue.merchant_id,
        burger = %catalogue.burger,
        "seeded demo catalogue"
    );
    Ok(catalogue)
}
