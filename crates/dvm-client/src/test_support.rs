//! In-memory [`RelayClient`] shared by this crate's tests.
//!
//! Publishing an event both records it (so `query` can see it later) and,
//! if it matches an active subscription's filter, broadcasts it as a
//! [`Notification`] on that subscription — mirroring how a real relay
//! echoes a publish back to the publisher's own subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use dvm_core::error::Result;
use dvm_core::relay::{Filter, Notification, RelayClient, SubscriptionId, UnsignedWireEvent, WireEvent};

pub struct FakeRelay {
    pubkey: String,
    events: Mutex<Vec<WireEvent>>,
    subscriptions: Mutex<HashMap<String, Filter>>,
    notify_tx: broadcast::Sender<Notification>,
    next_event_id: AtomicU64,
    next_sub_id: AtomicU64,
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            pubkey: "c".repeat(64),
            events: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            notify_tx,
            next_event_id: AtomicU64::new(0),
            next_sub_id: AtomicU64::new(0),
        })
    }

    /// Adds `event` to the query-able event log without triggering a
    /// notification, as if it had been published before any subscription
    /// existed.
    pub fn seed(&self, event: WireEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn matches(filter: &Filter, event: &WireEvent) -> bool {
        if !filter.kinds.is_empty() && !filter.kinds.contains(&event.kind) {
            return false;
        }
        if let Some(since) = filter.since {
            if event.created_at < since {
                return false;
            }
        }
        for (name, values) in &filter.tags {
            let has_match = event
                .tag_values(name)
                .map(|tag_values| tag_values.iter().any(|v| values.contains(v)))
                .unwrap_or(false);
            if !has_match {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl RelayClient for FakeRelay {
    async fn connect(&self, _urls: &[String]) -> Result<()> {
        Ok(())
    }

    async fn add_relay(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, event: UnsignedWireEvent) -> Result<WireEvent> {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let wire = WireEvent {
            id: format!("evt{id}"),
            pubkey: self.pubkey.clone(),
            created_at: dvm_core::now_secs(),
            kind: event.kind,
            tags: event.tags,
            content: event.content,
            sig: "fakesig".into(),
        };
        self.events.lock().unwrap().push(wire.clone());

        let subs = self.subscriptions.lock().unwrap().clone();
        for (sub_id, filter) in subs {
            if Self::matches(&filter, &wire) {
                let _ = self.notify_tx.send(Notification {
                    relay_url: "fake://relay".to_string(),
                    subscription_id: sub_id,
                    event: wire.clone(),
                });
            }
        }

        Ok(wire)
    }

    async fn subscribe(&self, filter: Filter) -> Result<SubscriptionId> {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let sub_id = format!("sub{id}");
        self.subscriptions.lock().unwrap().insert(sub_id.clone(), filter);
        Ok(SubscriptionId(sub_id))
    }

    async fn unsubscribe(&self, id: &SubscriptionId) {
        self.subscriptions.lock().unwrap().remove(&id.0);
    }

    async fn query(&self, filter: Filter) -> Result<Vec<WireEvent>> {
        let events = self.events.lock().unwrap();
        let mut matched: Vec<_> = events.iter().filter(|e| Self::matches(&filter, e)).cloned().collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    fn public_key(&self) -> String {
        self.pubkey.clone()
    }

    fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }
}
