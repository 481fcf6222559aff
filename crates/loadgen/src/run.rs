//! Concurrent order submission and the run report.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::CustomerId;
use ordering::{
    AlertDispatcher, CreateOrder, LoggingAlertSink, OrderController, OrderService, OrderingConfig,
};
use rand::Rng;
use stock_store::{CatalogueStore, StoreError, Store};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::config::LoadgenConfig;
use crate::seed::{self, DemoCatalogue};

/// Errors that abort a load run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task failed: {0}")]
    Task(#[from] JoinError),
}

/// Stock of one ingredient at the end of a run.
#[derive(Debug, Clone)]
pub struct StockLevel {
    pub name: String,
    pub stock: i64,
    pub consumed: i64,
    pub remaining: i64,
    pub notified: bool,
    /// Units one burger takes from this ingredient.
    pub per_burger: i64,
}

/// Outcome counters of a load run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub submitted: u64,
    pub committed: u64,
    /// Rejections by caller-facing category.
    pub rejected: BTreeMap<String, u64>,
    /// Burgers sold across all committed orders.
    pub units: i64,
    pub orders_in_store: u64,
    pub alerts: u64,
    pub elapsed: Duration,
    pub stock: Vec<StockLevel>,
}

impl RunSummary {
    /// True when the final stock matches exactly what the committed orders consumed.
    pub fn is_consistent(&self) -> bool {
        self.orders_in_store == self.committed
            && self.stock.iter().all(|level| {
                level.remaining >= 0
                    && level.consumed + level.remaining == level.stock
                    && level.consumed == self.units * level.per_burger
            })
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "submitted {} orders in {:.2?}: {} committed ({} burgers), {} alerts",
            self.submitted, self.elapsed, self.committed, self.units, self.alerts
        )?;
        for (category, count) in &self.rejected {
            writeln!(f, "  rejected/{category}: {count}")?;
        }
        for level in &self.stock {
            writeln!(
                f,
                "  {:<8} stock {:>6} consumed {:>6} remaining {:>6}{}",
                level.name,
                level.stock,
                level.consumed,
                level.remaining,
                if level.notified { " (low stock)" } else { "" }
            )?;
        }
        write!(
            f,
            "stock {}",
            if self.is_consistent() {
                "consistent"
            } else {
                "INCONSISTENT"
            }
        )
    }
}

/// Seeds the demo catalogue into `store` and places `load.orders` orders
/// against it, at most `load.concurrency` at a time.
pub async fn run<S>(
    store: S,
    ordering: &OrderingConfig,
    load: &LoadgenConfig,
) -> Result<RunSummary, LoadError>
where
    S: Store + CatalogueStore + Clone + 'static,
{
    let catalogue = seed::seed(&store).await?;

    let (notifier, dispatcher) = AlertDispatcher::channel(LoggingAlertSink);
    let alerts = dispatcher.spawn();
    let service = Arc::new(OrderService::new(OrderController::from_config(
        store.clone(),
        notifier,
        ordering,
    )));

    let permits = Arc::new(Semaphore::new(load.concurrency.max(1)));
    let started = Instant::now();
    let mut tasks = JoinSet::new();

    for _ in 0..load.orders {
        let service = Arc::clone(&service);
        let permits = Arc::clone(&permits);
        let quantity = rand::thread_rng().gen_range(1..=load.max_quantity);
        let cmd = CreateOrder::new(CustomerId::new()).with_line(catalogue.burger, quantity);

        tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await;
            service.create_order(cmd).await
        });
    }

    let mut summary = RunSummary::default();
    while let Some(joined) = tasks.join_next().await {
        summary.submitted += 1;
        match joined? {
            Ok(created) => {
                summary.committed += 1;
                summary.units += created
                    .order
                    .items
                    .iter()
                    .map(|item| item.quantity)
                    .sum::<i64>();
            }
            Err(rejected) => {
                *summary
                    .rejected
                    .entry(rejected.category.to_string())
                    .or_default() += 1;
            }
        }
    }
    summary.elapsed = started.elapsed();

    // Dropping the service drops the notifier, which lets the dispatcher drain and stop.
    drop(service);
    summary.alerts = alerts.await?;

    summary.orders_in_store = store.count_orders().await?;
    summary.stock = stock_levels(&store, &catalogue).await?;
    Ok(summary)
}

async fn stock_levels<C: CatalogueStore>(
    store: &C,
    catalogue: &DemoCatalogue,
) -> Result<Vec<StockLevel>, LoadError> {
    let mut levels = Vec::new();
    for (id, per_burger) in catalogue.recipe() {
        if let Some(ingredient) = store.load_ingredient(id).await? {
            levels.push(StockLevel {
                name: ingredient.name,
                stock: ingredient.stock_quantity,
                consumed: ingredient.consumed_quantity,
                remaining: ingredient.remaining_quantity,
                notified: ingredient.is_notified,
                per_burger,
            });
        }
    }
    Ok(levels)
}
