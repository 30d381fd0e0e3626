//! ==============================================================================
//! broadcast.rs - live-update fan-out to connected viewers
//! ==============================================================================
//!
//! purpose:
//!     every open dashboard holds a `Subscription`. the hub pushes two kinds
//!     of notification into each subscription's queue:
//!     - `update`: after each stored reading, and once right after subscribing
//!     - `heartbeat`: on a fixed interval, to keep proxies from closing idle
//!       connections
//!
//!     notifications are pings, not payloads. viewers fetch /lora/latest or
//!     /lora/history when prompted.
//!
//! delivery:
//!     one unbounded mpsc queue per subscriber. `notify` snapshots the sender
//!     set under the lock, sends with the lock released, then prunes every
//!     subscriber whose receiver is gone. there is no retry and no
//!     backpressure; a slow reader's queue simply grows.
//!
//! lifecycle:
//!
//!     subscribe() ──> Subscription ──(dropped by axum on disconnect)──> removed
//!                           │
//!                           └── unsubscribe() is idempotent
//!
//! ==============================================================================

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::Event;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Update,
    Heartbeat,
}

impl Notification {
    /// sse encoding: `data: update` or the comment line `: heartbeat`
    pub fn to_event(self) -> Event {
        match self {
            Notification::Update => Event::default().data("update"),
            Notification::Heartbeat => Event::default().comment("heartbeat"),
        }
    }
}

type SubscriberId = u64;

struct HubInner {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<Notification>>>,
    next_id: AtomicU64,
}

/// single owner of the subscriber set; cheap to clone
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// register a new viewer; its first message is an `update`
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // receiver is alive, this cannot fail
        let _ = tx.send(Notification::Update);

        let total = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        debug!(subscriber = id, total, "client connected");

        Subscription { id, rx, hub: self.clone(), registered: true }
    }

    /// remove a subscriber; returns whether it was still registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, remaining = self.subscriber_count(), "client removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// queue `kind` for every subscriber, returning how many accepted it
    pub fn notify(&self, kind: Notification) -> usize {
        let snapshot: Vec<(SubscriberId, mpsc::UnboundedSender<Notification>)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in &snapshot {
            if tx.send(kind).is_err() {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.inner.subscribers.lock();
            for id in &dead {
                subscribers.remove(id);
            }
            debug!(pruned = dead.len(), "removed disconnected clients");
        }

        let delivered = snapshot.len() - dead.len();
        debug!(?kind, delivered, "notification sent");
        delivered
    }

    /// run the heartbeat loop until the returned task is aborted
    pub fn spawn_heartbeat(&self, interval: Duration) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let delivered = hub.notify(Notification::Heartbeat);
                debug!(delivered, "heartbeat");
            }
        })
    }
}

// ==============================================================================
// subscription - one viewer's queue
// ==============================================================================

/// a live, non-restartable stream of notifications for one viewer
///
/// dropping the subscription deregisters it from the hub.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Notification>,
    hub: BroadcastHub,
    registered: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// wait for the next notification; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// next queued notification without waiting
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// leave the hub; later calls do nothing
    pub fn unsubscribe(&mut self) {
        if self.registered {
            self.registered = false;
            self.hub.unsubscribe(self.id);
            self.rx.close();
        }
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
