//! Publish/subscribe fan-out for statistics and executed deals.
//!
//! Both buses share one contract: a mutex-guarded map of subscribers, each
//! owning a bounded `mpsc` channel. `publish` clones the senders under the
//! lock and awaits the sends outside it, so a slow subscriber never blocks
//! subscription changes; once its buffer fills it does block the
//! publisher, which couples consumption to the tape rate. Dropping the
//! sending half (unsubscribe, replacement, or [`StatsBus::close_all`])
//! ends the subscriber's stream.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::stats::Bar;
use crate::types::Order;

/// Per-subscriber channel depth before `publish` starts awaiting.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Opaque identity of one statistics subscriber (one active stream).
pub type SubscriberId = u64;

/// Broadcast bus for bar statistics, keyed by stream identity.
#[derive(Debug, Default)]
pub struct StatsBus {
    inner: Mutex<StatsBusInner>,
}

#[derive(Debug, Default)]
struct StatsBusInner {
    next_id: SubscriberId,
    subs: HashMap<SubscriberId, mpsc::Sender<Bar>>,
}

impl StatsBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. The receiver yields every bar published
    /// from this point until the subscription is dropped.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Bar>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subs.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.lock().subs.remove(&id);
    }

    /// Deliver `bar` to every live subscriber, pruning any whose receiver
    /// is gone.
    pub async fn publish(&self, bar: &Bar) {
        let subs: Vec<(SubscriberId, mpsc::Sender<Bar>)> = self
            .inner
            .lock()
            .subs
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        for (id, tx) in subs {
            if tx.send(bar.clone()).await.is_err() {
                debug!(subscriber = id, "stats subscriber gone, pruning");
                self.unsubscribe(id);
            }
        }
    }

    /// Drop every subscriber channel; readers observe end-of-stream.
    pub fn close_all(&self) {
        self.inner.lock().subs.clear();
    }
}

/// Delivery bus for executed deals, keyed by broker id.
///
/// Fills are routed to the single subscriber whose broker id matches;
/// fills for brokers with no live subscription are dropped silently.
#[derive(Debug, Default)]
pub struct DealsBus {
    inner: Mutex<DealsBusInner>,
}

#[derive(Debug, Default)]
struct DealsBusInner {
    next_token: u64,
    subs: HashMap<i64, (u64, mpsc::Sender<Order>)>,
}

impl DealsBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `broker_id`, replacing (and thereby closing) any channel a
    /// previous subscription held. The token identifies this subscription
    /// for [`DealsBus::unsubscribe`].
    pub fn subscribe(&self, broker_id: i64) -> (u64, mpsc::Receiver<Order>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut inner = self.inner.lock();
        inner.next_token += 1;
        let token = inner.next_token;
        inner.subs.insert(broker_id, (token, tx));
        (token, rx)
    }

    /// Remove `broker_id`'s channel, but only if it still belongs to the
    /// subscription identified by `token` — a newer subscription for the
    /// same broker is left untouched.
    pub fn unsubscribe(&self, broker_id: i64, token: u64) {
        let mut inner = self.inner.lock();
        if inner.subs.get(&broker_id).is_some_and(|(t, _)| *t == token) {
            inner.subs.remove(&broker_id);
        }
    }

    /// Deliver `fill` to its broker's subscriber, if any.
    pub async fn publish(&self, fill: &Order) {
        let sub = self
            .inner
            .lock()
            .subs
            .get(&fill.broker_id)
            .map(|(token, tx)| (*token, tx.clone()));
        let Some((token, tx)) = sub else {
            debug!(broker = fill.broker_id, "no subscriber for fill, dropping");
            return;
        };
        if tx.send(fill.clone()).await.is_err() {
            debug!(broker = fill.broker_id, "deals subscriber gone, pruning");
            self.unsubscribe(fill.broker_id, token);
        }
    }

    /// Drop every subscriber channel; readers observe end-of-stream.
    pub fn close_all(&self) {
        self.inner.lock().subs.clear();
    }
}
