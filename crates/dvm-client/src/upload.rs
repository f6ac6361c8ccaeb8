//! Store a file on a chosen BlobDVM server.

use std::time::Duration;

use base64::Engine;

use dvm_core::codec::{self, RequestContent, ResponseContent};
use dvm_core::error::{DvmError, Result};
use dvm_core::relay::RelayClient;

use crate::pending;

/// Encodes `bytes` as a store request, publishes it to `server_pubkey`, and
/// waits for the resulting response. The subscription for the response
/// opens before the request is published.
pub async fn upload(
    relay: &dyn RelayClient,
    server_pubkey: &str,
    relay_hints: &[String],
    bytes: &[u8],
    filename: Option<String>,
) -> Result<ResponseContent> {
    upload_with_timeout(
        relay,
        server_pubkey,
        relay_hints,
        bytes,
        filename,
        pending::DEFAULT_RESPONSE_TIMEOUT,
    )
    .await
}

/// As [`upload`], but with an explicit response deadline instead of
/// [`pending::DEFAULT_RESPONSE_TIMEOUT`].
pub async fn upload_with_timeout(
    relay: &dyn RelayClient,
    server_pubkey: &str,
    relay_hints: &[String],
    bytes: &[u8],
    filename: Option<String>,
    response_timeout: Duration,
) -> Result<ResponseContent> {
    if bytes.len() > dvm_core::MAX_FILE_SIZE {
        return Err(DvmError::FileTooLarge {
            size: bytes.len(),
            limit: dvm_core::MAX_FILE_SIZE,
        });
    }

    let subscription = pending::subscribe_for_response(relay).await?;

    let action = RequestContent::Store {
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
        filename,
    };
    let unsigned = codec::build_request(action, server_pubkey, relay_hints)?;
    let request = relay.publish(unsigned).await?;

    pending::await_response(relay, &subscription, &request.id, response_timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRelay;
    use dvm_core::codec::ResponseStatus;
    use dvm_core::relay::WireEvent;

    /// Drives a single store request through to completion the way a
    /// server's worker would, without pulling in the whole `dvm-server`
    /// crate as a dependency.
    async fn run_fake_server(relay: std::sync::Arc<FakeRelay>, ready: tokio::sync::oneshot::Sender<()>) {
        let mut notifications = relay.notifications();
        relay
            .subscribe(dvm_core::relay::Filter::new().kinds([codec::KIND_REQUEST]))
            .await
            .unwrap();
        let _ = ready.send(());
        let notification = notifications.recv().await.unwrap();
        let event: WireEvent = notification.event;
        let request = codec::parse_request(&event).unwrap();

        if let RequestContent::Store { data, .. } = request {
            let bytes = base64::engine::general_purpose::STANDARD.decode(&data).unwrap();
            let hash = dvm_core::chunker::hash_hex(&bytes);
            let response = codec::build_response(
                &event.id,
                &event.pubkey,
                &ResponseContent {
                    hash,
                    size: bytes.len() as u64,
                    chunks: 1,
                    expires: dvm_core::now_secs() + dvm_core::DEFAULT_RETENTION_SECS,
                    status: ResponseStatus::Stored,
                },
            )
            .unwrap();
            relay.publish(response).await.unwrap();
        }
    }

    #[tokio::test]
    async fn upload_waits_for_and_returns_response() {
        let relay = FakeRelay::new();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let server_task = tokio::spawn(run_fake_server(relay.clone(), ready_tx));
        ready_rx.await.unwrap();

        let result = upload(relay.as_ref(), &relay.public_key(), &[], b"payload bytes", None)
            .await
            .unwrap();
        assert_eq!(result.status, ResponseStatus::Stored);
        assert_eq!(result.size, 13);

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn upload_rejects_oversized_payload_locally() {
        let relay = FakeRelay::new();
        let oversized = vec![0u8; dvm_core::MAX_FILE_SIZE + 1];
        let err = upload(relay.as_ref(), &relay.public_key(), &[], &oversized, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DvmError::FileTooLarge { .. }));
    }
}
