//! Per-ingredient stock deduction for one order line.

use common::{IngredientId, MerchantId};
use serde::{Deserialize, Serialize};
use stock_store::{
    DeductOutcome, Deduction, Ingredient, LowStockThreshold, ProductIngredient, StockLedger,
    StockTransaction,
};

use crate::error::{OrderError, Result};

/// Raised once per stocking cycle when an ingredient drops below its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockEvent {
    pub ingredient_id: IngredientId,
    pub merchant_id: MerchantId,
    pub name: String,
    pub remaining_quantity: i64,
    pub stock_quantity: i64,
    pub threshold_percent: u8,
}

impl LowStockEvent {
    /// Builds the event from the post-deduction ingredient snapshot.
    pub fn from_ingredient(ingredient: &Ingredient, threshold: LowStockThreshold) -> Self {
        Self {
            ingredient_id: ingredient.id,
            merchant_id: ingredient.merchant_id,
            name: ingredient.name.clone(),
            remaining_quantity: ingredient.remaining_quantity,
            stock_quantity: ingredient.stock_quantity,
            threshold_percent: threshold.percent(),
        }
    }
}

/// A deduction that was written inside the current transaction.
#[derive(Debug, Clone)]
pub struct DeductionReceipt {
    /// Ingredient state after the deduction.
    pub ingredient: Ingredient,
    pub deducted: i64,
    /// Set when this deduction tripped the low-stock latch.
    pub low_stock: Option<LowStockEvent>,
}

/// Applies ingredient consumption through a [`StockLedger`].
#[derive(Debug, Clone)]
pub struct DeductionEngine<L> {
    ledger: L,
    threshold: LowStockThreshold,
}

impl<L: StockLedger> DeductionEngine<L> {
    pub fn new(ledger: L, threshold: LowStockThreshold) -> Self {
        Self { ledger, threshold }
    }

    pub fn with_threshold(mut self, threshold: LowStockThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn threshold(&self) -> LowStockThreshold {
        self.threshold
    }

    /// Deducts `association.amount * quantity` units of one ingredient.
    ///
    /// Business failures (missing ingredient, not enough stock) are final.
    /// A concurrent write is reported as [`OrderError::WriteConflict`] and
    /// leaves nothing written by this call.
    #[tracing::instrument(
        level = "debug",
        skip(self, tx, association),
        fields(ingredient_id = %association.ingredient_id, product_id = %association.product_id)
    )]
    pub async fn deduct<T: StockTransaction>(
        &self,
        tx: &mut T,
        association: &ProductIngredient,
        quantity: i64,
    ) -> Result<DeductionReceipt> {
        let amount =
            association
                .amount
                .checked_mul(quantity)
                .ok_or(OrderError::InvalidQuantity {
                    product_id: association.product_id,
                    quantity,
                })?;

        let current = self
            .ledger
            .read(tx, association.ingredient_id)
            .await?
            .ok_or(OrderError::UnknownIngredient(association.ingredient_id))?;

        let deduction = Deduction {
            ingredient_id: current.id,
            amount,
            expected_version: current.version,
            threshold: self.threshold,
        };

        match self.ledger.try_deduct(tx, &deduction).await? {
            DeductOutcome::Applied { ingredient, latched } => {
                let low_stock =
                    latched.then(|| LowStockEvent::from_ingredient(&ingredient, self.threshold));
                Ok(DeductionReceipt {
                    ingredient,
                    deducted: amount,
                    low_stock,
                })
            }
            DeductOutcome::InsufficientStock {
                ingredient,
                requested,
            } => {
                tracing::warn!(
                    ingredient_id = %ingredient.id,
                    ingredient = %ingredient.name,
                    requested,
                    available = ingredient.remaining_quantity,
                    "insufficient stock"
                );
                Err(OrderError::InsufficientStock {
                    ingredient_id: ingredient.id,
                    name: ingredient.name,
                    requested,
                    available: ingredient.remaining_quantity,
                })
            }
            DeductOutcome::Conflict { expected, actual } => {
                tracing::debug!(
                    ingredient_id = %current.id,
                    %expected,
                    actual = ?actual.map(|v| v.as_i64()),
                    strategy = %self.ledger.strategy(),
                    "stock write conflict"
                );
                Err(OrderError::WriteConflict(format!(
                    "ingredient {} changed concurrently (expected version {expected})",
                    current.id
                )))
            }
            DeductOutcome::NotFound => {
                tracing::warn!(ingredient_id = %current.id, "ingredient vanished during deduction");
                Err(OrderError::UnknownIngredient(current.id))
            }
        }
    }
}
