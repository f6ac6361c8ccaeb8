//! The relay-client boundary.
//!
//! Everything the protocol engine needs from the underlying Nostr relay
//! network is expressed as [`RelayClient`] — connect, publish, subscribe,
//! one-shot query, and a notification stream of inbound events. The real
//! implementation, [`nostr_adapter::NostrRelayClient`], wraps `nostr-sdk`;
//! engine code (server and client crates) only ever programs against the
//! trait, so tests can swap in an in-memory fake without a live relay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A signed Nostr event, trimmed to the fields the engine inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl WireEvent {
    /// First value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// All values (positions 1..) of the first tag named `name`.
    pub fn tag_values(&self, name: &str) -> Option<&[String]> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .map(|t| &t[1..])
    }
}

/// An event awaiting a signature; built by the codec, signed by whichever
/// `Keys` the caller holds.
#[derive(Debug, Clone)]
pub struct UnsignedWireEvent {
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// A relay subscription filter. Mirrors the subset of Nostr filter fields
/// this protocol actually uses.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub kinds: Vec<u16>,
    pub since: Option<u64>,
    pub limit: Option<usize>,
    /// Tag filters, e.g. `("e", vec![request_id])` for `#e`. Single-letter
    /// names (`e`, `p`, `k`, `d`) map onto standard NIP-01 tag queries;
    /// multi-letter names (`file_hash`) rely on relay support for generic
    /// tag queries, same as any other BlobDVM-specific tag.
    pub tags: Vec<(String, Vec<String>)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn tag(mut self, name: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        self.tags.push((name.into(), values.into_iter().collect()));
        self
    }
}

/// An inbound event plus the context it arrived with.
#[derive(Debug, Clone)]
pub struct Notification {
    pub relay_url: String,
    pub subscription_id: String,
    pub event: WireEvent,
}

/// Opaque handle returned by [`RelayClient::subscribe`]; pass back to
/// `unsubscribe` to release it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

/// The exact surface the engine consumes from a relay-client library:
/// connect, publish, subscribe-with-filter, query-past-events,
/// receive-notification.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn connect(&self, urls: &[String]) -> Result<()>;

    async fn add_relay(&self, url: &str) -> Result<()>;

    /// Sign `event` with this client's keys and publish it to every
    /// connected relay.
    async fn publish(&self, event: UnsignedWireEvent) -> Result<WireEvent>;

    async fn subscribe(&self, filter: Filter) -> Result<SubscriptionId>;

    async fn unsubscribe(&self, id: &SubscriptionId);

    /// One-shot historical fetch; does not open a standing subscription.
    async fn query(&self, filter: Filter) -> Result<Vec<WireEvent>>;

    /// This client's own public key, hex-encoded.
    fn public_key(&self) -> String;

    /// A receiver of every event delivered to any active subscription.
    fn notifications(&self) -> tokio::sync::broadcast::Receiver<Notification>;
}

pub mod nostr_adapter {
    //! `nostr-sdk`-backed [`RelayClient`].

    use std::sync::Arc;

    use async_trait::async_trait;
    use nostr_sdk::prelude::*;
    use tokio::sync::broadcast;

    use super::{Filter as DvmFilter, Notification, RelayClient, SubscriptionId, UnsignedWireEvent, WireEvent};
    use crate::error::{DvmError, Result};

    /// Buffer size for the internal notification broadcast channel. Slow
    /// subscribers drop the oldest notifications rather than back-pressure
    /// the relay pool.
    const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

    pub struct NostrRelayClient {
        client: Client,
        pubkey_hex: String,
        notify_tx: broadcast::Sender<Notification>,
    }

    impl NostrRelayClient {
        /// Builds a client signing as `keys` and starts the background task
        /// that forwards relay-pool notifications onto our broadcast
        /// channel.
        pub fn new(keys: Keys) -> Arc<Self> {
            let pubkey_hex = keys.public_key().to_hex();
            let client = Client::new(keys);
            let (notify_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
            let this = Arc::new(Self {
                client,
                pubkey_hex,
                notify_tx,
            });

            let forwarder = this.clone();
            tokio::spawn(async move { forwarder.forward_notifications().await });

            this
        }

        async fn forward_notifications(&self) {
            let mut notifications = self.client.notifications();
            while let Ok(notification) = notifications.recv().await {
                if let RelayPoolNotification::Event {
                    relay_url,
                    subscription_id,
                    event,
                } = notification
                {
                    let wire = match to_wire_event(&event) {
                        Ok(w) => w,
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping malformed relay event");
                            continue;
                        }
                    };
                    let _ = self.notify_tx.send(Notification {
                        relay_url: relay_url.to_string(),
                        subscription_id: subscription_id.to_string(),
                        event: wire,
                    });
                }
            }
        }
    }

    #[async_trait]
    impl RelayClient for NostrRelayClient {
        async fn connect(&self, urls: &[String]) -> Result<()> {
            for url in urls {
                self.add_relay(url).await?;
            }
            self.client.connect().await;
            Ok(())
        }

        async fn add_relay(&self, url: &str) -> Result<()> {
            self.client
                .add_relay(url)
                .await
                .map_err(|e| DvmError::Internal(format!("add_relay({url}): {e}")))?;
            Ok(())
        }

        async fn publish(&self, event: UnsignedWireEvent) -> Result<WireEvent> {
            let builder = EventBuilder::new(Kind::Custom(event.kind), event.content)
                .tags(event.tags.iter().filter_map(|t| to_sdk_tag(t)));

            let output = self
                .client
                .send_event_builder(builder)
                .await
                .map_err(|e| DvmError::Internal(format!("publish failed: {e}")))?;

            self.client
                .database()
                .event_by_id(output.id())
                .await
                .ok()
                .flatten()
                .map(|ev| to_wire_event(&ev))
                .transpose()?
                .ok_or_else(|| DvmError::Internal("published event not found in local database".into()))
        }

        async fn subscribe(&self, filter: DvmFilter) -> Result<SubscriptionId> {
            let sdk_filter = to_sdk_filter(filter);
            let output = self
                .client
                .subscribe(sdk_filter, None)
                .await
                .map_err(|e| DvmError::Internal(format!("subscribe failed: {e}")))?;
            Ok(SubscriptionId(output.val.to_string()))
        }

        async fn unsubscribe(&self, id: &SubscriptionId) {
            self.client
                .unsubscribe(&nostr_sdk::SubscriptionId::new(id.0.clone()))
                .await;
        }

        async fn query(&self, filter: DvmFilter) -> Result<Vec<WireEvent>> {
            let sdk_filter = to_sdk_filter(filter);
            let events = self
                .client
                .fetch_events(sdk_filter, std::time::Duration::from_secs(10))
                .await
                .map_err(|e| DvmError::Internal(format!("query failed: {e}")))?;
            events.into_iter().map(|e| to_wire_event(&e)).collect()
        }

        fn public_key(&self) -> String {
            self.pubkey_hex.clone()
        }

        fn notifications(&self) -> broadcast::Receiver<Notification> {
            self.notify_tx.subscribe()
        }
    }

    fn to_sdk_filter(filter: DvmFilter) -> nostr_sdk::Filter {
        let mut f = nostr_sdk::Filter::new();
        if !filter.kinds.is_empty() {
            f = f.kinds(filter.kinds.into_iter().map(Kind::Custom));
        }
        if let Some(since) = filter.since {
            f = f.since(Timestamp::from(since));
        }
        if let Some(limit) = filter.limit {
            f = f.limit(limit);
        }
        for (name, values) in filter.tags {
            let kind = match name.chars().next() {
                Some(c) if name.len() == 1 => {
                    TagKind::SingleLetter(SingleLetterTag::lowercase(Alphabet::from_char(c).unwrap_or(Alphabet::E)))
                }
                _ => TagKind::Custom(name.into()),
            };
            f = f.custom_tag(kind, values);
        }
        f
    }

    fn to_sdk_tag(tag: &[String]) -> Option<Tag> {
        if tag.is_empty() {
            return None;
        }
        Tag::parse(tag).ok()
    }

    fn to_wire_event(event: &Event) -> Result<WireEvent> {
        Ok(WireEvent {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            created_at: event.created_at.as_u64(),
            kind: event.kind.as_u16(),
            tags: event
                .tags
                .iter()
                .map(|t| t.as_slice().iter().map(|s| s.to_string()).collect())
                .collect(),
            content: event.content.clone(),
            sig: event.sig.to_string(),
        })
    }
}
