//! Retrieve a file from a BlobDVM server by its content hash.

use std::collections::HashMap;
use std::time::Duration;

use dvm_core::chunker::{self, Chunk};
use dvm_core::codec::{self, ParsedChunk, RequestContent};
use dvm_core::error::{DvmError, Result};
use dvm_core::relay::{Filter, Notification, RelayClient, SubscriptionId};

use crate::pending;

/// Default bound on how long a client waits for all of a file's chunks
/// once its response has arrived.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieves `file_hash` from `server_pubkey` and returns the reassembled,
/// integrity-checked bytes.
///
/// Subscriptions for both the chunk stream and the response/status stream
/// open before the retrieve request is published, so a fast server cannot
/// race the client's own subscribe calls.
pub async fn download(
    relay: &dyn RelayClient,
    server_pubkey: &str,
    relay_hints: &[String],
    file_hash: &str,
) -> Result<Vec<u8>> {
    download_with_timeouts(
        relay,
        server_pubkey,
        relay_hints,
        file_hash,
        pending::DEFAULT_RESPONSE_TIMEOUT,
        DEFAULT_CHUNK_TIMEOUT,
    )
    .await
}

/// As [`download`], but with explicit response and chunk-collection
/// deadlines instead of the module defaults.
pub async fn download_with_timeouts(
    relay: &dyn RelayClient,
    server_pubkey: &str,
    relay_hints: &[String],
    file_hash: &str,
    response_timeout: Duration,
    chunk_timeout: Duration,
) -> Result<Vec<u8>> {
    let chunk_subscription = subscribe_for_chunks(relay, file_hash).await?;
    let response_subscription = pending::subscribe_for_response(relay).await?;

    // Opened now, before the request exists, so a fast server's chunks have
    // nowhere to go but this receiver's buffer. `collect_chunks` reads from
    // it later, but a broadcast receiver only misses what was sent before
    // *this* call — not before it is first polled.
    let mut chunk_notifications = relay.notifications();

    let action = RequestContent::Retrieve {
        hash: file_hash.to_string(),
    };
    let unsigned = codec::build_request(action, server_pubkey, relay_hints)?;
    let request = relay.publish(unsigned).await?;

    let response =
        pending::await_response(relay, &response_subscription, &request.id, response_timeout).await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            relay.unsubscribe(&chunk_subscription).await;
            return Err(e);
        }
    };

    if response.hash != file_hash {
        relay.unsubscribe(&chunk_subscription).await;
        return Err(DvmError::IntegrityFailed(format!(
            "server responded with hash {} for a request about {file_hash}",
            response.hash
        )));
    }

    let chunks = collect_chunks(&mut chunk_notifications, &chunk_subscription, file_hash, chunk_timeout).await;
    relay.unsubscribe(&chunk_subscription).await;
    let chunks = chunks?;

    chunker::verify_and_assemble(chunks, file_hash)
}

async fn subscribe_for_chunks(relay: &dyn RelayClient, file_hash: &str) -> Result<SubscriptionId> {
    let filter = Filter::new()
        .kinds([codec::KIND_CHUNK])
        .tag("file_hash", [file_hash.to_string()])
        .since(dvm_core::now_secs().saturating_sub(5));
    relay.subscribe(filter).await
}

/// Accumulates chunk events for `file_hash` until every index `0..total` has
/// arrived with a matching hash, `total` itself learned from the first
/// valid chunk. Chunks whose recomputed hash disagrees with their
/// `chunk_hash` tag are discarded; a second arrival for an already-filled
/// index is ignored.
///
/// `notifications` must have been created before the retrieve request was
/// published — see the comment in [`download_with_timeouts`].
async fn collect_chunks(
    notifications: &mut tokio::sync::broadcast::Receiver<Notification>,
    subscription: &SubscriptionId,
    file_hash: &str,
    timeout: Duration,
) -> Result<Vec<Chunk>> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut received: HashMap<u32, ParsedChunk> = HashMap::new();
    let mut total: Option<u32> = None;

    loop {
        if let Some(t) = total {
            if received.len() as u32 >= t {
                break;
            }
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            let total = total.unwrap_or(0) as usize;
            return Err(DvmError::ChunkMissing {
                missing: total.saturating_sub(received.len()),
                total,
            });
        }

        let notification = match tokio::time::timeout(remaining, notifications.recv()).await {
            Ok(Ok(n)) => n,
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => break,
            Err(_) => continue,
        };

        if notification.subscription_id != subscription.0 {
            continue;
        }
        let parsed = match codec::parse_chunk(&notification.event) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if parsed.file_hash != file_hash {
            continue;
        }
        if chunker::hash_hex(&parsed.bytes) != parsed.chunk_hash {
            tracing::debug!(index = parsed.index, "discarding chunk with bad hash");
            continue;
        }
        match total {
            None => total = Some(parsed.total),
            Some(t) if t != parsed.total => {
                return Err(DvmError::IntegrityFailed(format!(
                    "chunk_total disagreement: {t} vs {}",
                    parsed.total
                )))
            }
            _ => {}
        }
        received.entry(parsed.index).or_insert(parsed);
    }

    if let Some(t) = total {
        if received.len() as u32 != t {
            return Err(DvmError::ChunkMissing {
                missing: t as usize - received.len(),
                total: t as usize,
            });
        }
    } else {
        return Err(DvmError::ChunkMissing { missing: 0, total: 0 });
    }

    Ok(received
        .into_values()
        .map(|p| Chunk {
            index: p.index,
            total: p.total,
            bytes: p.bytes,
            chunk_hash: p.chunk_hash,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRelay;
    use dvm_core::codec::{ChunkEvent, ResponseContent, ResponseStatus};
    use dvm_core::relay::WireEvent;

    async fn run_fake_server(
        relay: std::sync::Arc<FakeRelay>,
        bytes: Vec<u8>,
        ready: tokio::sync::oneshot::Sender<()>,
    ) {
        let mut notifications = relay.notifications();
        relay
            .subscribe(Filter::new().kinds([codec::KIND_REQUEST]))
            .await
            .unwrap();
        let _ = ready.send(());
        let notification = notifications.recv().await.unwrap();
        let event: WireEvent = notification.event;
        let request = codec::parse_request(&event).unwrap();

        if let RequestContent::Retrieve { hash } = request {
            let chunks = chunker::split(&bytes);
            let expires = dvm_core::now_secs() + dvm_core::DEFAULT_RETENTION_SECS;
            for chunk in &chunks {
                let unsigned = codec::build_chunk(ChunkEvent {
                    file_hash: &hash,
                    index: chunk.index,
                    total: chunk.total,
                    chunk_hash: &chunk.chunk_hash,
                    expiration: expires,
                    bytes: &chunk.bytes,
                });
                relay.publish(unsigned).await.unwrap();
            }
            let response = codec::build_response(
                &event.id,
                &event.pubkey,
                &ResponseContent {
                    hash,
                    size: bytes.len() as u64,
                    chunks: chunks.len() as u32,
                    expires,
                    status: ResponseStatus::Available,
                },
            )
            .unwrap();
            relay.publish(response).await.unwrap();
        }
    }

    #[tokio::test]
    async fn download_reassembles_full_file() {
        let relay = FakeRelay::new();
        let data: Vec<u8> = (0..80_000u32).map(|i| (i % 256) as u8).collect();
        let hash = chunker::hash_hex(&data);

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let server_task = tokio::spawn(run_fake_server(relay.clone(), data.clone(), ready_tx));
        ready_rx.await.unwrap();
        let result = download(relay.as_ref(), &relay.public_key(), &[], &hash).await.unwrap();
        assert_eq!(result, data);

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn download_of_unknown_hash_propagates_not_found() {
        let relay = FakeRelay::new();
        let hash = "d".repeat(64);

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let server_task = tokio::spawn({
            let relay = relay.clone();
            async move {
                let mut notifications = relay.notifications();
                relay.subscribe(Filter::new().kinds([codec::KIND_REQUEST])).await.unwrap();
                let _ = ready_tx.send(());
                let notification = notifications.recv().await.unwrap();
                let event = notification.event;
                let error = codec::build_error_status(
                    &event.id,
                    &event.pubkey,
                    dvm_core::error::ErrorCode::FileNotFound,
                    "no such file",
                );
                relay.publish(error).await.unwrap();
            }
        });
        ready_rx.await.unwrap();

        let err = download(relay.as_ref(), &relay.public_key(), &[], &hash).await.unwrap_err();
        assert_eq!(err.code(), dvm_core::error::ErrorCode::FileNotFound);
        server_task.await.unwrap();
    }

    /// A single-chunk file where the chunk event on the wire is tampered
    /// (correct index/total, `bytes` no longer matching `chunk_hash`). The
    /// client must discard it and, with no honest replacement arriving,
    /// time out with `CHUNK_MISSING` rather than ever accepting the
    /// corrupted bytes.
    #[tokio::test]
    async fn corrupted_chunk_is_discarded_and_download_times_out() {
        let relay = FakeRelay::new();
        let data = vec![0x42u8; 1024];
        let hash = chunker::hash_hex(&data);

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let server_task = tokio::spawn({
            let relay = relay.clone();
            let hash = hash.clone();
            async move {
                let mut notifications = relay.notifications();
                relay.subscribe(Filter::new().kinds([codec::KIND_REQUEST])).await.unwrap();
                let _ = ready_tx.send(());
                let notification = notifications.recv().await.unwrap();
                let event = notification.event;

                let chunk = &chunker::split(&data)[0];
                let mut tampered_bytes = chunk.bytes.clone();
                tampered_bytes[0] ^= 0xFF;
                let unsigned = codec::build_chunk(ChunkEvent {
                    file_hash: &hash,
                    index: chunk.index,
                    total: chunk.total,
                    chunk_hash: &chunk.chunk_hash,
                    expiration: dvm_core::now_secs() + dvm_core::DEFAULT_RETENTION_SECS,
                    bytes: &tampered_bytes,
                });
                relay.publish(unsigned).await.unwrap();

                let response = codec::build_response(
                    &event.id,
                    &event.pubkey,
                    &ResponseContent {
                        hash,
                        size: data.len() as u64,
                        chunks: 1,
                        expires: dvm_core::now_secs() + dvm_core::DEFAULT_RETENTION_SECS,
                        status: ResponseStatus::Available,
                    },
                )
                .unwrap();
                relay.publish(response).await.unwrap();
            }
        });
        ready_rx.await.unwrap();

        let err = download_with_timeouts(
            relay.as_ref(),
            &relay.public_key(),
            &[],
            &hash,
            pending::DEFAULT_RESPONSE_TIMEOUT,
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DvmError::ChunkMissing { .. }));
        server_task.await.unwrap();
    }
}
