//! Transaction and retry control for order placement.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId};
use serde::{Deserialize, Serialize};
use stock_store::{
    LockingStrategy, LowStockThreshold, Order, OrderItem, OrderNumber, StockLedger,
    StockTransaction, Store,
};

use crate::assembler::{OrderAssembler, OrderLine};
use crate::config::OrderingConfig;
use crate::deduction::{DeductionEngine, LowStockEvent};
use crate::error::{OrderError, Result};
use crate::notifier::LowStockNotifier;
use crate::retry::RetryPolicy;
use crate::sequencer::OrderNumberSequencer;

/// A committed order as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub order_number: OrderNumber,
    pub total_price: Money,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderReceipt {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            customer_id: order.customer_id,
            order_number: order.order_number,
            total_price: order.total_price,
            items: order.items,
            created_at: order.created_at,
        }
    }
}

/// Places orders as atomic units of work.
///
/// Each attempt opens a transaction, assembles the order (deducting stock),
/// allocates the order number last and commits. Retryable failures roll the
/// attempt back and start over, up to the policy's attempt limit. Low-stock
/// events are handed to the notifier only after a successful commit.
pub struct OrderController<S, L, N> {
    store: S,
    assembler: OrderAssembler<L>,
    sequencer: OrderNumberSequencer,
    retry: RetryPolicy,
    notifier: N,
}

impl<S, N> OrderController<S, LockingStrategy, N>
where
    S: Store,
    N: LowStockNotifier,
{
    /// Builds a controller with the ledger strategy, threshold, numbering
    /// and retry policy taken from `config`.
    pub fn from_config(store: S, notifier: N, config: &OrderingConfig) -> Self {
        Self::new(store, config.deduction_strategy, notifier)
            .with_threshold(config.threshold())
            .with_sequencer(OrderNumberSequencer::new(config.starting_order_number()))
            .with_retry_policy(config.retry_policy())
    }
}

impl<S, L, N> OrderController<S, L, N>
where
    S: Store,
    L: StockLedger,
    N: LowStockNotifier,
{
    pub fn new(store: S, ledger: L, notifier: N) -> Self {
        Self {
            store,
            assembler: OrderAssembler::new(DeductionEngine::new(
                ledger,
                LowStockThreshold::default(),
            )),
            sequencer: OrderNumberSequencer::default(),
            retry: RetryPolicy::default(),
            notifier,
        }
    }

    pub fn with_threshold(mut self, threshold: LowStockThreshold) -> Self {
        self.assembler = self.assembler.with_threshold(threshold);
        self
    }

    pub fn with_sequencer(mut self, sequencer: OrderNumberSequencer) -> Self {
        self.sequencer = sequencer;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Places one order, retrying transient conflicts.
    ///
    /// Dropping the returned future rolls back the open attempt.
    #[tracing::instrument(
        skip(self, lines),
        fields(%customer_id, lines = lines.len(), strategy = %self.assembler.engine().ledger().strategy())
    )]
    pub async fn place_order(
        &self,
        customer_id: CustomerId,
        lines: &[OrderLine],
    ) -> Result<OrderReceipt> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            metrics::counter!("order_attempts_total").increment(1);

            match self.attempt(customer_id, lines).await {
                Ok((order, alerts)) => {
                    metrics::counter!("orders_placed_total").increment(1);
                    metrics::histogram!("order_placement_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::info!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        total_price = %order.total_price,
                        attempts = attempt,
                        "order committed"
                    );

                    for event in alerts {
                        metrics::counter!("low_stock_alerts_total").increment(1);
                        self.notifier.notify(event);
                    }
                    return Ok(OrderReceipt::from(order));
                }
                Err(err) if err.is_retryable() => {
                    if !self.retry.should_retry(attempt) {
                        let exhausted = OrderError::RetriesExhausted {
                            attempts: attempt,
                            last_reason: err.to_string(),
                        };
                        return Err(self.fail(customer_id, lines, attempt, exhausted, started));
                    }

                    metrics::counter!("order_retries_total").increment(1);
                    tracing::warn!(attempt, error = %err, "order attempt conflicted, retrying");
                    let delay = self.retry.backoff();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(self.fail(customer_id, lines, attempt, err, started)),
            }
        }
    }

    /// Runs one attempt in its own transaction. Commits on success, rolls
    /// back on any failure.
    async fn attempt(
        &self,
        customer_id: CustomerId,
        lines: &[OrderLine],
    ) -> Result<(Order, Vec<LowStockEvent>)> {
        let mut tx = self.store.begin().await?;

        match self.build_order(&mut tx, customer_id, lines).await {
            Ok(placed) => {
                tx.commit().await?;
                Ok(placed)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn build_order(
        &self,
        tx: &mut S::Transaction,
        customer_id: CustomerId,
        lines: &[OrderLine],
    ) -> Result<(Order, Vec<LowStockEvent>)> {
        let draft = self.assembler.assemble(tx, OrderId::new(), lines).await?;
        let order_number = self.sequencer.next_order_number(tx).await?;
        let (order, alerts) = draft.into_order(customer_id, order_number);
        tx.insert_order(&order).await?;
        Ok((order, alerts))
    }

    fn fail(
        &self,
        customer_id: CustomerId,
        lines: &[OrderLine],
        attempts: u32,
        err: OrderError,
        started: Instant,
    ) -> OrderError {
        metrics::counter!("order_failures_total", "reason" => err.reason()).increment(1);
        metrics::histogram!("order_placement_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::error!(
            %customer_id,
            ?lines,
            attempts,
            reason = err.reason(),
            error = %err,
            "order failed"
        );
        err
    }
}
