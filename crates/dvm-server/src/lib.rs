//! The server side of BlobDVM: hold an announcement, accept requests, store
//! and serve chunked content over Nostr.
//!
//! [`ServerEngine`] is the entry point; construct one with a concrete
//! [`dvm_core::relay::RelayClient`] and a [`ServerConfig`], then call
//! [`ServerEngine::run`] from the `serve` CLI command.

mod dedup;
mod engine;
mod handlers;
mod store;

pub use engine::{ServerConfig, ServerEngine};
pub use store::{ContentStore, FileRecord, PutOutcome};
