//! Correlating a published request with its eventual response.
//!
//! Both `upload` and `download` publish a 24210 request and then wait for
//! the first 24211/21999 event tagged back to that request's id. The
//! subscription must be open before the request is published, or a
//! fast-responding server's events could arrive before anyone is listening.

use std::time::Duration;

use dvm_core::codec::{self, ResponseContent};
use dvm_core::error::{DvmError, ErrorCode, Result};
use dvm_core::relay::{Filter, RelayClient, SubscriptionId};

/// Default bound on how long a client waits for a response after
/// publishing a request.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens the subscription that will carry a response, before the request
/// whose response it is has even been published. The request's id is not
/// known at this point — signing happens inside [`RelayClient::publish`] —
/// so the filter covers both response kinds broadly and [`await_response`]
/// narrows to the right request by its `e` tag once the id is known.
pub async fn subscribe_for_response(relay: &dyn RelayClient) -> Result<SubscriptionId> {
    let filter = Filter::new()
        .kinds([codec::KIND_RESPONSE, codec::KIND_STATUS])
        .since(dvm_core::now_secs().saturating_sub(5));
    relay.subscribe(filter).await
}

/// Waits for `request_id`'s response on `subscription`, within `timeout`.
///
/// An `error` status tagged to this request fails immediately with the
/// wire-level error code it carries. A `processing` status is ignored and
/// waiting continues. Unsubscribes before returning either way.
pub async fn await_response(
    relay: &dyn RelayClient,
    subscription: &SubscriptionId,
    request_id: &str,
    timeout: Duration,
) -> Result<ResponseContent> {
    let result = await_response_inner(relay, subscription, request_id, timeout).await;
    relay.unsubscribe(subscription).await;
    result
}

async fn await_response_inner(
    relay: &dyn RelayClient,
    subscription: &SubscriptionId,
    request_id: &str,
    timeout: Duration,
) -> Result<ResponseContent> {
    let mut notifications = relay.notifications();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(DvmError::ResponseTimeout);
        }

        let notification = match tokio::time::timeout(remaining, notifications.recv()).await {
            Ok(Ok(n)) => n,
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                return Err(DvmError::ResponseTimeout)
            }
            Err(_) => return Err(DvmError::ResponseTimeout),
        };

        if notification.subscription_id != subscription.0 {
            continue;
        }
        if notification.event.tag_value("e") != Some(request_id) {
            continue;
        }

        if notification.event.kind == codec::KIND_STATUS {
            if let Ok(status) = codec::parse_status(&notification.event) {
                if status.status.as_deref() == Some("error") {
                    let code = status.error_code.unwrap_or(ErrorCode::InternalError);
                    return Err(DvmError::from_wire(code, status.message));
                }
            }
            continue;
        }

        if notification.event.kind == codec::KIND_RESPONSE {
            return codec::parse_response(&notification.event);
        }
    }
}
