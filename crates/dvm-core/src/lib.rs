//! Shared protocol engine for BlobDVM: the chunker, the event codec, the
//! relay-client boundary, and the error taxonomy. Both `dvm-server` and
//! `dvm-client` depend on this crate so that content addresses and wire
//! framing can never drift between the two sides.

pub mod chunker;
pub mod codec;
pub mod error;
pub mod relay;

/// Maximum accepted file size: 10 MiB.
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Default retention window for a stored file: 24 hours.
pub const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;

pub use chunker::CHUNK_SIZE;

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}
