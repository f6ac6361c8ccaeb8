//! The server engine: announce, subscribe, queue, and drain.
//!
//! [`ServerEngine::run`] is the long-lived task a `serve` command awaits.
//! It publishes one announcement, opens a subscription for kind-24210
//! requests, and spawns a worker pool that drains an in-process job queue
//! fed by the notification stream. The queue is bounded: a server under
//! sustained overload sheds new requests with an `INTERNAL_ERROR` status
//! rather than growing without bound (the spec's own design notes flag the
//! unbounded queue in the source system as a production risk).

use std::sync::Arc;

use dvm_core::codec;
use dvm_core::error::{DvmError, ErrorCode, Result};
use dvm_core::relay::{Filter, RelayClient, WireEvent};

use crate::dedup::Dedup;
use crate::store::ContentStore;

/// Bound on the server's request job queue. Requests beyond this are shed
/// with an `INTERNAL_ERROR` status rather than queued indefinitely.
const JOB_QUEUE_CAPACITY: usize = 1024;

/// How many workers concurrently drain the job queue.
const WORKER_COUNT: usize = 4;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub about: String,
    pub relays: Vec<String>,
    pub retention_secs: u64,
    pub max_file_size: usize,
    /// `None` means unbounded, the proof-of-concept default.
    pub capacity_limit: Option<u64>,
    pub sweep_interval: std::time::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "BlobDVM server".to_string(),
            about: "Content-addressed blob storage over Nostr".to_string(),
            relays: Vec::new(),
            retention_secs: dvm_core::DEFAULT_RETENTION_SECS,
            max_file_size: dvm_core::MAX_FILE_SIZE,
            capacity_limit: None,
            sweep_interval: std::time::Duration::from_secs(30),
        }
    }
}

pub struct ServerEngine {
    pub(crate) relay: Arc<dyn RelayClient>,
    pub(crate) store: Arc<ContentStore>,
    pub(crate) dedup: Arc<Dedup>,
    pub(crate) config: ServerConfig,
}

impl ServerEngine {
    pub fn new(relay: Arc<dyn RelayClient>, config: ServerConfig) -> Self {
        Self {
            relay,
            store: Arc::new(ContentStore::new()),
            dedup: Arc::new(Dedup::new()),
            config,
        }
    }

    /// Publishes the server's kind-31999 announcement.
    pub async fn announce(&self) -> Result<WireEvent> {
        let unsigned = codec::build_announcement(
            &self.config.name,
            &self.config.about,
            codec::AnnouncementParams {
                max_file_size: self.config.max_file_size as u64,
                chunk_size: dvm_core::CHUNK_SIZE as u64,
                retention_hours: self.config.retention_secs / 3600,
            },
        );
        self.relay.publish(unsigned).await
    }

    /// Connects, announces, subscribes, and runs the worker pool forever
    /// (or until the relay notification stream ends).
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.relay.connect(&self.config.relays).await?;
        self.announce().await?;

        let filter = Filter::new().kinds([codec::KIND_REQUEST]).since(dvm_core::now_secs());
        let subscription = self.relay.subscribe(filter).await?;
        tracing::info!(subscription_id = %subscription.0, "subscribed to requests");

        let (job_tx, job_rx) = tokio::sync::mpsc::channel::<WireEvent>(JOB_QUEUE_CAPACITY);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        for worker_id in 0..WORKER_COUNT {
            let engine = self.clone();
            let job_rx = job_rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = { job_rx.lock().await.recv().await };
                    match job {
                        Some(event) => engine.handle_request(event).await,
                        None => {
                            tracing::debug!(worker_id, "job queue closed, worker exiting");
                            break;
                        }
                    }
                }
            });
        }

        tokio::spawn(crate::store::run_sweeper(
            self.store.clone(),
            self.config.sweep_interval,
        ));

        let mut notifications = self.relay.notifications();
        loop {
            match notifications.recv().await {
                Ok(notification) if notification.subscription_id == subscription.0 => {
                    if notification.event.kind != codec::KIND_REQUEST {
                        continue;
                    }
                    match job_tx.try_send(notification.event) {
                        Ok(()) => {}
                        Err(tokio::sync::mpsc::error::TrySendError::Full(event)) => {
                            tracing::warn!(event_id = %event.id, "job queue full, shedding request");
                            self.emit_error(&event, ErrorCode::InternalError, "server overloaded")
                                .await;
                        }
                        Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification receiver lagged, some events were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }

        Ok(())
    }

    pub(crate) async fn emit_error(&self, request: &WireEvent, code: ErrorCode, message: &str) {
        let unsigned = codec::build_error_status(&request.id, &request.pubkey, code, message);
        if let Err(e) = self.relay.publish(unsigned).await {
            tracing::error!(error = %e, request_id = %request.id, "failed to publish error status");
        }
    }

    pub(crate) fn classify(&self, err: &DvmError) -> (ErrorCode, String) {
        (err.code(), err.to_string())
    }
}
