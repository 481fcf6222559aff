//! Shared types used across the ordering workspace.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{CustomerId, IngredientId, MerchantId, OrderId, ProductId};
