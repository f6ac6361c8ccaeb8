//! Server discovery: a historical query for announcements, deduplicated to
//! the newest descriptor per `(pubkey, d-tag)`.

use std::collections::HashMap;

use dvm_core::codec::{self, ServerDescriptor};
use dvm_core::error::Result;
use dvm_core::relay::{Filter, RelayClient};

/// How many announcements to ask a relay for in one query.
const DISCOVERY_LIMIT: usize = 50;

/// Queries every connected relay for BlobDVM server announcements and
/// returns one [`ServerDescriptor`] per server, keeping the newest
/// `created_at` when a server has re-announced.
pub async fn discover_servers(relay: &dyn RelayClient) -> Result<Vec<ServerDescriptor>> {
    let filter = Filter::new()
        .kinds([codec::KIND_ANNOUNCEMENT])
        .tag("k", [codec::KIND_REQUEST.to_string()])
        .limit(DISCOVERY_LIMIT);

    let events = relay.query(filter).await?;

    let mut newest: HashMap<(String, String), ServerDescriptor> = HashMap::new();
    for event in &events {
        let descriptor = match codec::parse_announcement(event) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(error = %e, event_id = %event.id, "skipping malformed announcement");
                continue;
            }
        };
        let key = (descriptor.pubkey.clone(), descriptor.d_tag.clone());
        match newest.get(&key) {
            Some(existing) if existing.created_at >= descriptor.created_at => {}
            _ => {
                newest.insert(key, descriptor);
            }
        }
    }

    let mut servers: Vec<_> = newest.into_values().collect();
    servers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(servers)
}
