//! Low-stock alert trigger and out-of-band delivery.
//!
//! The controller calls [`LowStockNotifier::notify`] after a commit. The
//! production notifier, [`ChannelNotifier`], only pushes onto an unbounded
//! channel; an [`AlertDispatcher`] task drains it and hands each event to an
//! [`AlertSink`]. Delivery failures stay inside the dispatcher.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::deduction::LowStockEvent;

/// Receives low-stock events raised by committed orders.
///
/// Implementations must not block: they are called on the order path.
pub trait LowStockNotifier: Send + Sync {
    fn notify(&self, event: LowStockEvent);
}

impl<N: LowStockNotifier + ?Sized> LowStockNotifier for Arc<N> {
    fn notify(&self, event: LowStockEvent) {
        (**self).notify(event)
    }
}

/// Notifier that forwards events to an [`AlertDispatcher`].
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<LowStockEvent>,
}

impl LowStockNotifier for ChannelNotifier {
    fn notify(&self, event: LowStockEvent) {
        if let Err(mpsc::error::SendError(event)) = self.sender.send(event) {
            tracing::warn!(
                ingredient_id = %event.ingredient_id,
                "alert dispatcher stopped, dropping low-stock event"
            );
        }
    }
}

/// Error returned by an [`AlertSink`].
#[derive(Debug, Error)]
#[error("Alert delivery failed: {0}")]
pub struct AlertError(pub String);

/// Final destination of low-stock alerts (mail, chat, pager, ...).
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, event: &LowStockEvent) -> Result<(), AlertError>;
}

/// Sink that writes the alert as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertSink;

#[async_trait]
impl AlertSink for LoggingAlertSink {
    async fn deliver(&self, event: &LowStockEvent) -> Result<(), AlertError> {
        tracing::warn!(
            subject = "Stock Alert",
            ingredient_id = %event.ingredient_id,
            merchant_id = %event.merchant_id,
            ingredient = %event.name,
            remaining = event.remaining_quantity,
            stock = event.stock_quantity,
            "The stock for ingredient '{}' is below {}%! Current stock: {}. Please restock soon.",
            event.name,
            event.threshold_percent,
            event.remaining_quantity,
        );
        Ok(())
    }
}

/// Background worker draining a [`ChannelNotifier`].
pub struct AlertDispatcher<S> {
    receiver: mpsc::UnboundedReceiver<LowStockEvent>,
    sink: S,
}

impl<S: AlertSink + 'static> AlertDispatcher<S> {
    /// Creates a connected notifier and dispatcher pair.
    pub fn channel(sink: S) -> (ChannelNotifier, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelNotifier { sender }, Self { receiver, sink })
    }

    /// Delivers events until every [`ChannelNotifier`] has been dropped.
    ///
    /// Returns the number of events handed to the sink.
    pub async fn run(mut self) -> u64 {
        let mut dispatched = 0;
        while let Some(event) = self.receiver.recv().await {
            dispatched += 1;
            match self.sink.deliver(&event).await {
                Ok(()) => metrics::counter!("low_stock_alerts_delivered_total").increment(1),
                Err(e) => {
                    metrics::counter!("low_stock_alert_failures_total").increment(1);
                    tracing::error!(
                        ingredient_id = %event.ingredient_id,
                        error = %e,
                        "failed to deliver low-stock alert"
                    );
                }
            }
        }
        tracing::debug!(dispatched, "alert dispatcher stopped");
        dispatched
    }

    /// Runs the dispatcher on its own task.
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }
}

/// Notifier that keeps every event in memory. Useful in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<LowStockEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event received so far.
    pub fn events(&self) -> Vec<LowStockEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LowStockNotifier for RecordingNotifier {
    fn notify(&self, event: LowStockEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use common::{IngredientId, MerchantId};

    use super::*;

    fn event(name: &str) -> LowStockEvent {
        LowStockEvent {
            ingredient_id: IngredientId::new(),
            merchant_id: MerchantId::new(),
            name: name.to_string(),
            remaining_quantity: 490,
            stock_quantity: 1000,
            threshold_percent: 50,
        }
    }

    #[derive(Clone, Default)]
    struct CollectingSink {
        delivered: Arc<tokio::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AlertSink for CollectingSink {
        async fn deliver(&self, event: &LowStockEvent) -> Result<(), AlertError> {
            if event.name == "Broken" {
                return Err(AlertError("smtp down".to_string()));
            }
            self.delivered.lock().await.push(event.name.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatcher_delivers_in_order_and_stops_when_senders_drop() {
        let sink = CollectingSink::default();
        let delivered = Arc::clone(&sink.delivered);
        let (notifier, dispatcher) = AlertDispatcher::channel(sink);
        let handle = dispatcher.spawn();

        notifier.notify(event("Cheese"));
        notifier.notify(event("Onion"));
        drop(notifier);

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(*delivered.lock().await, vec!["Cheese", "Onion"]);
    }

    #[tokio::test]
    async fn delivery_failure_does_not_stop_the_dispatcher() {
        let sink = CollectingSink::default();
        let delivered = Arc::clone(&sink.delivered);
        let (notifier, dispatcher) = AlertDispatcher::channel(sink);
        let handle = dispatcher.spawn();

        notifier.notify(event("Broken"));
        notifier.notify(event("Beef"));
        drop(notifier);

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(*delivered.lock().await, vec!["Beef"]);
    }

    #[tokio::test]
    async fn notify_after_dispatcher_is_gone_is_harmless() {
        let (notifier, dispatcher) = AlertDispatcher::channel(LoggingAlertSink);
        drop(dispatcher);
        notifier.notify(event("Cheese"));
    }

    #[test]
    fn recording_notifier_keeps_events() {
        let notifier = RecordingNotifier::new();
        let shared: Arc<dyn LowStockNotifier> = Arc::new(notifier.clone());
        shared.notify(event("Cheese"));
        assert_eq!(notifier.events().len(), 1);
    }
}
