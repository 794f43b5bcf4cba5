//! Domain events and their delivery.
//!
//! Sessions map backend push notifications to [`EventKind`]s on whatever thread
//! the backend calls them from. Each session owns an [`EventSink`] that tags
//! events with the session's correlation id and network; the [`EventRouter`]
//! funnels every sink into one channel and redelivers from a single dispatcher
//! task, so subscribers see one totally ordered stream. Events emitted while
//! nobody is subscribed are dropped.

use crate::types::{ConnectionEvent, NetworkIdentity, Settings, TransactionEvent, TwoFactorReset};
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

/// What changed on a subaccount.
#[derive(Debug, Clone, PartialEq)]
pub enum SubaccountEvent {
    /// A new receive address should be shown.
    AddressChanged,
    /// Raw backend subaccount notification.
    Updated(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Block { block_height: u32 },
    Subaccount { pointer: u32, event: SubaccountEvent },
    Transaction(TransactionEvent),
    TwoFactorReset(TwoFactorReset),
    Settings(Settings),
    Network(ConnectionEvent),
    Tor(Value),
    Ticker(Value),
    /// A Lightning invoice was paid, or the node synced and balances may have moved.
    InvoicePaid { payment_hash: Option<String> },
    PaymentSucceeded { payment_hash: String },
    PaymentFailed { error: String },
}

/// An event tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub session_id: Uuid,
    pub network: NetworkIdentity,
    pub kind: EventKind,
}

/// Emitting side handed to one session.
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: Uuid,
    network: NetworkIdentity,
    tx: mpsc::UnboundedSender<DomainEvent>,
    subscribers: Subscribers,
}

impl EventSink {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn network(&self) -> NetworkIdentity {
        self.network
    }

    /// Tag and forward an event. Never blocks.
    pub fn emit(&self, kind: EventKind) {
        log::debug!("{} event {:?}", self.network, kind);
        if self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
        {
            return;
        }
        let event = DomainEvent {
            session_id: self.session_id,
            network: self.network,
            kind,
        };
        if self.tx.send(event).is_err() {
            log::debug!("Event router gone, dropping {} event", self.network);
        }
    }
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<DomainEvent>>>>;

/// Single-context fan-out of domain events to subscribers.
pub struct EventRouter {
    tx: mpsc::UnboundedSender<DomainEvent>,
    /// Taken by the dispatcher task once a runtime is available.
    rx: Mutex<Option<mpsc::UnboundedReceiver<DomainEvent>>>,
    subscribers: Subscribers,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Self {
            tx,
            rx: Mutex::new(Some(rx)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        };
        router.start_dispatcher();
        router
    }

    /// Sink for the session identified by `session_id`.
    pub fn sink(&self, session_id: Uuid, network: NetworkIdentity) -> EventSink {
        EventSink {
            session_id,
            network,
            tx: self.tx.clone(),
            subscribers: self.subscribers.clone(),
        }
    }

    /// Subscribe to every event emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        self.start_dispatcher();
        EventStream { rx }
    }

    fn start_dispatcher(&self) {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        if rx.is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("No runtime available, event dispatch deferred");
            return;
        };
        if let Some(mut events) = rx.take() {
            let subscribers = self.subscribers.clone();
            runtime.spawn(async move {
                while let Some(event) = events.recv().await {
                    let mut subscribers = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
                    subscribers.retain(|s| s.send(event.clone()).is_ok());
                }
            });
        }
    }
}

/// Receiving side of a subscription.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<DomainEvent>,
}

impl EventStream {
    /// Next event, or `None` once the router is gone.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = DomainEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
