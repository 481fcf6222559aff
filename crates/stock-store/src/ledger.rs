//! Stock ledger: validated, conflict-aware ingredient deductions.
//!
//! Two interchangeable strategies implement [`StockLedger`]:
//! - [`PessimisticLedger`] locks the ingredient row on read and holds the lock
//!   until the transaction ends. A concurrent deducter waits; a wait longer
//!   than the store's lock timeout surfaces as a conflict.
//! - [`OptimisticLedger`] reads without locking and conditions the write on
//!   the version it read. A moved version is reported as
//!   [`DeductOutcome::Conflict`] rather than an error.
//!
//! Both reject a deduction that would drive remaining stock below zero and
//! never apply it partially.

use std::str::FromStr;

use async_trait::async_trait;
use common::IngredientId;
use serde::{Deserialize, Serialize};

use crate::store::{RowLock, StockTransaction};
use crate::{Consumption, Ingredient, LowStockThreshold, Result, Version};

/// A request to consume `amount` units of one ingredient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deduction {
    pub ingredient_id: IngredientId,
    pub amount: i64,
    /// Version observed by the read that validated this deduction.
    pub expected_version: Version,
    pub threshold: LowStockThreshold,
}

/// Outcome of [`StockLedger::try_deduct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeductOutcome {
    /// The deduction was written. `ingredient` is the post-deduction row and
    /// `latched` tells whether this write tripped the low-stock alert.
    Applied { ingredient: Ingredient, latched: bool },
    /// A concurrent writer got there first. Retry with a fresh transaction.
    Conflict {
        expected: Version,
        actual: Option<Version>,
    },
    /// Not enough stock; `ingredient` is the unchanged row.
    InsufficientStock { ingredient: Ingredient, requested: i64 },
    NotFound,
}

/// Persistence contract for one ingredient's stock counters.
#[async_trait]
pub trait StockLedger: Send + Sync {
    fn strategy(&self) -> LockingStrategy;

    /// Reads the ingredient a deduction will be validated against.
    async fn read<T: StockTransaction>(
        &self,
        tx: &mut T,
        id: IngredientId,
    ) -> Result<Option<Ingredient>>;

    /// Applies a deduction atomically with respect to the read that produced
    /// `deduction.expected_version`.
    async fn try_deduct<T: StockTransaction>(
        &self,
        tx: &mut T,
        deduction: &Deduction,
    ) -> Result<DeductOutcome>;
}

/// Lock-then-write ledger. Row locks serialize concurrent deducters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PessimisticLedger;

#[async_trait]
impl StockLedger for PessimisticLedger {
    fn strategy(&self) -> LockingStrategy {
        LockingStrategy::Pessimistic
    }

    async fn read<T: StockTransaction>(
        &self,
        tx: &mut T,
        id: IngredientId,
    ) -> Result<Option<Ingredient>> {
        tx.fetch_ingredient(id, RowLock::Exclusive).await
    }

    async fn try_deduct<T: StockTransaction>(
        &self,
        tx: &mut T,
        deduction: &Deduction,
    ) -> Result<DeductOutcome> {
        // Re-entrant: the lock is already held since `read`.
        let Some(current) = tx
            .fetch_ingredient(deduction.ingredient_id, RowLock::Exclusive)
            .await?
        else {
            return Ok(DeductOutcome::NotFound);
        };

        if current.version != deduction.expected_version {
            return Ok(DeductOutcome::Conflict {
                expected: deduction.expected_version,
                actual: Some(current.version),
            });
        }

        match current.consume(deduction.amount, deduction.threshold) {
            Consumption::Insufficient { .. } => Ok(DeductOutcome::InsufficientStock {
                ingredient: current,
                requested: deduction.amount,
            }),
            Consumption::Applied { next, latched } => {
                if !tx.write_ingredient(&next, None).await? {
                    return Ok(DeductOutcome::NotFound);
                }
                Ok(DeductOutcome::Applied {
                    ingredient: next,
                    latched,
                })
            }
        }
    }
}

/// Version-conditioned ledger. No locks are taken on read.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticLedger;

#[async_trait]
impl StockLedger for OptimisticLedger {
    fn strategy(&self) -> LockingStrategy {
        LockingStrategy::Optimistic
    }

    async fn read<T: StockTransaction>(
        &self,
        tx: &mut T,
        id: IngredientId,
    ) -> Result<Option<Ingredient>> {
        tx.fetch_ingredient(id, RowLock::None).await
    }

    async fn try_deduct<T: StockTransaction>(
        &self,
        tx: &mut T,
        deduction: &Deduction,
    ) -> Result<DeductOutcome> {
        let Some(current) = tx
            .fetch_ingredient(deduction.ingredient_id, RowLock::None)
            .await?
        else {
            return Ok(DeductOutcome::NotFound);
        };

        if current.version != deduction.expected_version {
            return Ok(DeductOutcome::Conflict {
                expected: deduction.expected_version,
                actual: Some(current.version),
            });
        }

        match current.consume(deduction.amount, deduction.threshold) {
            Consumption::Insufficient { .. } => Ok(DeductOutcome::InsufficientStock {
                ingredient: current,
                requested: deduction.amount,
            }),
            Consumption::Applied { next, latched } => {
                let written = tx
                    .write_ingredient(&next, Some(deduction.expected_version))
                    .await?;
                if !written {
                    return Ok(DeductOutcome::Conflict {
                        expected: deduction.expected_version,
                        actual: None,
                    });
                }
                Ok(DeductOutcome::Applied {
                    ingredient: next,
                    latched,
                })
            }
        }
    }
}

/// Deployment-time choice between the two ledger strategies.
///
/// Implements [`StockLedger`] itself by delegating to the selected strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockingStrategy {
    #[default]
    Pessimistic,
    Optimistic,
}

impl std::fmt::Display for LockingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockingStrategy::Pessimistic => write!(f, "pessimistic"),
            LockingStrategy::Optimistic => write!(f, "optimistic"),
        }
    }
}

impl FromStr for LockingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pessimistic" => Ok(LockingStrategy::Pessimistic),
            "optimistic" => Ok(LockingStrategy::Optimistic),
            other => Err(format!("unknown locking strategy: {other}")),
        }
    }
}

#[async_trait]
impl StockLedger for LockingStrategy {
    fn strategy(&self) -> LockingStrategy {
        *self
    }

    async fn read<T: StockTransaction>(
        &self,
        tx: &mut T,
        id: IngredientId,
    ) -> Result<Option<Ingredient>> {
        match self {
            LockingStrategy::Pessimistic => PessimisticLedger.read(tx, id).await,
            LockingStrategy::Optimistic => OptimisticLedger.read(tx, id).await,
        }
    }

    async fn try_deduct<T: StockTransaction>(
        &self,
        tx: &mut T,
        deduction: &Deduction,
    ) -> Result<DeductOutcome> {
        match self {
            LockingStrategy::Pessimistic => PessimisticLedger.try_deduct(tx, deduction).await,
            LockingStrategy::Optimistic => OptimisticLedger.try_deduct(tx, deduction).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::MerchantId;

    use super::*;
    use crate::{InMemoryStore, Store};

    async fn seeded(stock: i64) -> (InMemoryStore, IngredientId) {
        let store = InMemoryStore::new();
        let beef = Ingredient::new(MerchantId::new(), "Beef", stock).unwrap();
        let id = beef.id;
        store.insert_ingredient(beef).await.unwrap();
        (store, id)
    }

    fn deduction(id: IngredientId, amount: i64, expected_version: Version) -> Deduction {
        Deduction {
            ingredient_id: id,
            amount,
            expected_version,
            threshold: LowStockThreshold::default(),
        }
    }

    #[tokio::test]
    async fn both_strategies_apply_and_commit() {
        for ledger in [LockingStrategy::Pessimistic, LockingStrategy::Optimistic] {
            let (store, id) = seeded(500).await;
            let mut tx = store.begin().await.unwrap();

            let current = ledger.read(&mut tx, id).await.unwrap().unwrap();
            let outcome = ledger
                .try_deduct(&mut tx, &deduction(id, 20, current.version))
                .await
                .unwrap();
            assert!(matches!(outcome, DeductOutcome::Applied { .. }), "{ledger}");
            tx.commit().await.unwrap();

            let stored = store.ingredient(id).await.unwrap();
            assert_eq!(stored.consumed_quantity, 20);
            assert_eq!(stored.remaining_quantity, 480);
            assert_eq!(stored.version, Version::new(2));
        }
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_row_untouched() {
        for ledger in [LockingStrategy::Pessimistic, LockingStrategy::Optimistic] {
            let (store, id) = seeded(100).await;
            let mut tx = store.begin().await.unwrap();

            let outcome = ledger
                .try_deduct(&mut tx, &deduction(id, 101, Version::first()))
                .await
                .unwrap();
            assert!(
                matches!(outcome, DeductOutcome::InsufficientStock { requested: 101, .. }),
                "{ledger}"
            );
            tx.commit().await.unwrap();

            let stored = store.ingredient(id).await.unwrap();
            assert_eq!(stored.remaining_quantity, 100);
            assert_eq!(stored.version, Version::first());
        }
    }

    #[tokio::test]
    async fn unknown_ingredient_is_not_found() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let outcome = OptimisticLedger
            .try_deduct(&mut tx, &deduction(IngredientId::new(), 1, Version::first()))
            .await
            .unwrap();
        assert_eq!(outcome, DeductOutcome::NotFound);
    }

    #[tokio::test]
    async fn optimistic_reports_conflict_when_version_moved() {
        let (store, id) = seeded(500).await;

        let mut slow = store.begin().await.unwrap();
        let seen = OptimisticLedger.read(&mut slow, id).await.unwrap().unwrap();

        let mut fast = store.begin().await.unwrap();
        let outcome = OptimisticLedger
            .try_deduct(&mut fast, &deduction(id, 10, seen.version))
            .await
            .unwrap();
        assert!(matches!(outcome, DeductOutcome::Applied { .. }));
        fast.commit().await.unwrap();

        let outcome = OptimisticLedger
            .try_deduct(&mut slow, &deduction(id, 10, seen.version))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DeductOutcome::Conflict {
                expected: Version::first(),
                actual: Some(Version::new(2)),
            }
        );
    }

    #[tokio::test]
    async fn optimistic_conflict_surfaces_at_commit_when_both_wrote() {
        let (store, id) = seeded(500).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        for tx in [&mut first, &mut second] {
            let outcome = OptimisticLedger
                .try_deduct(tx, &deduction(id, 100, Version::first()))
                .await
                .unwrap();
            assert!(matches!(outcome, DeductOutcome::Applied { .. }));
        }

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.ingredient(id).await.unwrap().remaining_quantity, 400);
    }

    #[tokio::test]
    async fn pessimistic_read_blocks_second_deducter_until_commit() {
        let (store, id) = seeded(500).await;

        let mut holder = store.begin().await.unwrap();
        let seen = PessimisticLedger.read(&mut holder, id).await.unwrap().unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = waiter_store.begin().await.unwrap();
            let seen = PessimisticLedger.read(&mut tx, id).await.unwrap().unwrap();
            let outcome = PessimisticLedger
                .try_deduct(&mut tx, &deduction(id, 300, seen.version))
                .await
                .unwrap();
            tx.commit().await.unwrap();
            outcome
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        PessimisticLedger
            .try_deduct(&mut holder, &deduction(id, 300, seen.version))
            .await
            .unwrap();
        holder.commit().await.unwrap();

        let outcome = waiter.await.unwrap();
        assert!(matches!(
            outcome,
            DeductOutcome::InsufficientStock { requested: 300, .. }
        ));
        assert_eq!(store.ingredient(id).await.unwrap().remaining_quantity, 200);
    }

    #[tokio::test]
    async fn pessimistic_lock_wait_times_out_as_conflict() {
        let store = InMemoryStore::new().with_lock_timeout(Duration::from_millis(20));
        let beef = Ingredient::new(MerchantId::new(), "Beef", 10).unwrap();
        let id = beef.id;
        store.insert_ingredient(beef).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        PessimisticLedger.read(&mut holder, id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = PessimisticLedger.read(&mut waiter, id).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!(
            "Optimistic".parse::<LockingStrategy>().unwrap(),
            LockingStrategy::Optimistic
        );
        assert_eq!(
            " pessimistic ".parse::<LockingStrategy>().unwrap(),
            LockingStrategy::Pessimistic
        );
        assert!("eventual".parse::<LockingStrategy>().is_err());
    }
}
