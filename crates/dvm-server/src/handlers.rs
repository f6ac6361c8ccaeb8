//! The request lifecycle: dedup -> processing status -> dispatch -> publish.
//!
//! Every inbound kind-24210 event passes through [`ServerEngine::handle_request`]
//! exactly once per worker. A second delivery of the same event id is
//! dropped at the [`crate::dedup::Dedup`] gate before any status is emitted.

use base64::Engine;

use dvm_core::chunker;
use dvm_core::codec::{self, ChunkEvent, RequestContent, ResponseContent, ResponseStatus};
use dvm_core::error::{DvmError, ErrorCode};
use dvm_core::relay::WireEvent;

use crate::engine::ServerEngine;
use crate::store::FileRecord;

impl ServerEngine {
    pub(crate) async fn handle_request(&self, event: WireEvent) {
        if !self.dedup.claim(&event.id) {
            tracing::debug!(event_id = %event.id, "duplicate request, dropping");
            return;
        }

        let processing = codec::build_processing_status(&event.id, &event.pubkey);
        if let Err(e) = self.relay.publish(processing).await {
            tracing::warn!(error = %e, event_id = %event.id, "failed to publish processing status");
        }

        let outcome = match codec::parse_request(&event) {
            Ok(action) => self.dispatch(&event, action).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(content) => {
                if let Err(e) = self.publish_response(&event, &content).await {
                    tracing::error!(error = %e, event_id = %event.id, "failed to publish response");
                }
            }
            Err(err) => {
                let (code, message) = self.classify(&err);
                self.emit_error(&event, code, &message).await;
            }
        }
    }

    async fn dispatch(
        &self,
        event: &WireEvent,
        action: RequestContent,
    ) -> dvm_core::error::Result<ResponseContent> {
        match action {
            RequestContent::Store { data, filename } => self.handle_store(data, filename).await,
            RequestContent::Retrieve { hash } => self.handle_retrieve(&hash).await,
            RequestContent::Delete { hash } => self.handle_delete(&hash).await,
        }
    }

    async fn handle_store(
        &self,
        data: String,
        filename: Option<String>,
    ) -> dvm_core::error::Result<ResponseContent> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(&data)?;

        if bytes.len() > self.config.max_file_size {
            return Err(DvmError::FileTooLarge {
                size: bytes.len(),
                limit: self.config.max_file_size,
            });
        }

        if let Some(limit) = self.config.capacity_limit {
            if self.store.live_bytes() + bytes.len() as u64 > limit {
                return Err(DvmError::StorageFull);
            }
        }

        let hash = chunker::hash_hex(&bytes);
        let chunks = chunker::split(&bytes);
        let expires_at = dvm_core::now_secs() + self.config.retention_secs;
        let total = chunks.len() as u32;

        let outcome = self.store.put(
            hash.clone(),
            FileRecord {
                size: bytes.len() as u64,
                chunks: chunks.clone(),
                filename,
                expires_at,
            },
        );

        if outcome == crate::store::PutOutcome::Inserted {
            self.publish_chunks(&hash, &chunks, expires_at).await?;
        }

        Ok(ResponseContent {
            hash,
            size: bytes.len() as u64,
            chunks: total,
            expires: expires_at,
            status: ResponseStatus::Stored,
        })
    }

    async fn handle_retrieve(&self, hash: &str) -> dvm_core::error::Result<ResponseContent> {
        let record = self.store.get(hash).ok_or(DvmError::FileNotFound)?;
        self.publish_chunks(hash, &record.chunks, record.expires_at).await?;
        Ok(ResponseContent {
            hash: hash.to_string(),
            size: record.size,
            chunks: record.chunks.len() as u32,
            expires: record.expires_at,
            status: ResponseStatus::Available,
        })
    }

    async fn handle_delete(&self, hash: &str) -> dvm_core::error::Result<ResponseContent> {
        if !self.store.delete(hash) {
            return Err(DvmError::FileNotFound);
        }
        Ok(ResponseContent {
            hash: hash.to_string(),
            size: 0,
            chunks: 0,
            expires: 0,
            status: ResponseStatus::Deleted,
        })
    }

    /// Publishes every chunk of a file, in order, before the response that
    /// references it — a client must be able to start collecting chunks the
    /// moment it sees the response.
    async fn publish_chunks(
        &self,
        file_hash: &str,
        chunks: &[chunker::Chunk],
        expiration: u64,
    ) -> dvm_core::error::Result<()> {
        for chunk in chunks {
            let unsigned = codec::build_chunk(ChunkEvent {
                file_hash,
                index: chunk.index,
                total: chunk.total,
                chunk_hash: &chunk.chunk_hash,
                expiration,
                bytes: &chunk.bytes,
            });
            self.relay.publish(unsigned).await?;
        }
        Ok(())
    }

    async fn publish_response(
        &self,
        request: &WireEvent,
        content: &ResponseContent,
    ) -> dvm_core::error::Result<()> {
        let unsigned = codec::build_response(&request.id, &request.pubkey, content)?;
        self.relay.publish(unsigned).await?;
        Ok(())
    }
}
