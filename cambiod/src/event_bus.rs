//! Event bus: status updates from the lifecycle engine to subscribers.
//!
//! The presentation layer never polls the engine; it subscribes here and
//! receives a callback on every state change. Uses tokio broadcast
//! channels for fan-out to multiple receivers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cambio_domain::{ExchangeId, ExchangeStatus};
use cambio_engine::LifecycleEvent;

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the daemon event bus.
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    /// An exchange's observable state changed
    StatusChanged {
        /// Exchange the change belongs to
        exchange_id: ExchangeId,
        /// New status
        status: ExchangeStatus,
        /// Deposit hash, once known
        tx_hash: Option<String>,
        /// Confirmation count, meaningful from `received` onward
        confirmations: Option<u32>,
        /// Finality threshold for the record
        required_confirmations: Option<u32>,
        /// When the change was published
        timestamp: DateTime<Utc>,
    },

    /// Observed deposit diverges materially from the requested amount.
    /// Informational; the lifecycle proceeds on the actual amount.
    AmountMismatch {
        /// Exchange the notice belongs to
        exchange_id: ExchangeId,
        /// Requested from-amount
        expected: Decimal,
        /// Observed deposit amount
        actual: Decimal,
        /// When the notice was published
        timestamp: DateTime<Utc>,
    },

    /// A deposit observation that conflicts with the recorded hash;
    /// flagged for manual reconciliation, never overwrites the record.
    DepositAnomaly {
        /// Exchange the anomaly belongs to
        exchange_id: ExchangeId,
        /// The conflicting transaction hash
        tx_hash: String,
        /// When the anomaly was published
        timestamp: DateTime<Utc>,
    },
}

impl ExchangeEvent {
    /// The exchange this event belongs to.
    pub fn exchange_id(&self) -> ExchangeId {
        match self {
            ExchangeEvent::StatusChanged { exchange_id, .. }
            | ExchangeEvent::AmountMismatch { exchange_id, .. }
            | ExchangeEvent::DepositAnomaly { exchange_id, .. } => *exchange_id,
        }
    }

    /// Lift a lifecycle event into a bus event.
    pub fn from_lifecycle(exchange_id: ExchangeId, event: &LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::StatusChanged {
                status,
                tx_hash,
                confirmations,
                required_confirmations,
            } => ExchangeEvent::StatusChanged {
                exchange_id,
                status: *status,
                tx_hash: tx_hash.clone(),
                confirmations: *confirmations,
                required_confirmations: *required_confirmations,
                timestamp: Utc::now(),
            },
            LifecycleEvent::AmountMismatch { expected, actual } => ExchangeEvent::AmountMismatch {
                exchange_id,
                expected: *expected,
                actual: *actual,
                timestamp: Utc::now(),
            },
        }
    }
}

/// Payload handed to per-exchange subscription callbacks.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    /// Current status
    pub status: ExchangeStatus,
    /// Deposit hash, once known
    pub tx_hash: Option<String>,
    /// Confirmation count, when meaningful
    pub confirmations: Option<u32>,
    /// Finality threshold for the record
    pub required_confirmations: Option<u32>,
}

// =============================================================================
// Event Bus
// =============================================================================

/// Event bus for daemon-wide communication.
///
/// Multiple producers can send events, and multiple consumers can receive.
pub struct EventBus {
    sender: broadcast::Sender<ExchangeEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Capacity determines how many events can be buffered before slow
    /// receivers start missing events (lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    pub fn send(&self, event: ExchangeEvent) -> usize {
        // send() returns Err if there are no receivers, but we don't care
        self.sender.send(event).unwrap_or(0)
    }

    /// Publish the events of an applied lifecycle decision, in order.
    pub fn publish_decision(&self, exchange_id: ExchangeId, events: &[LifecycleEvent]) {
        for event in events {
            self.send(ExchangeEvent::from_lifecycle(exchange_id, event));
        }
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to one exchange's status changes with a callback.
    ///
    /// The callback fires on every state change of the exchange; the
    /// subscription task ends itself once a terminal status was delivered.
    pub fn subscribe_exchange<F>(&self, exchange_id: ExchangeId, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(StatusUpdate) + Send + 'static,
    {
        let mut receiver = self.subscribe();

        tokio::spawn(async move {
            while let Some(result) = receiver.recv().await {
                let Ok(event) = result else {
                    continue; // lagged; next events still arrive
                };

                if let ExchangeEvent::StatusChanged {
                    exchange_id: id,
                    status,
                    tx_hash,
                    confirmations,
                    required_confirmations,
                    ..
                } = event
                {
                    if id != exchange_id {
                        continue;
                    }

                    let terminal = status.is_terminal();
                    callback(StatusUpdate {
                        status,
                        tx_hash,
                        confirmations,
                        required_confirmations,
                    });

                    if terminal {
                        break;
                    }
                }
            }
        })
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receiver for exchange events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<ExchangeEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the sender has been dropped.
    /// Returns error description if the receiver lagged (missed events).
    pub async fn recv(&mut self) -> Option<Result<ExchangeEvent, String>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<Result<ExchangeEvent, String>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
