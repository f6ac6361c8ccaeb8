//! Process configuration, read from the environment.
//!
//! `.env` is loaded (if present) before any `env::var` call, matching the
//! teacher's `dotenvy` usage. Every field has a documented default except
//! the private key, which `serve` and any request-signing command require.

use nostr_sdk::Keys;

#[derive(Clone, Debug)]
pub struct Config {
    pub relays: Vec<String>,
    pub retention_secs: u64,
    pub max_file_size: usize,
    pub response_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let relays = std::env::var("BLOBDVM_RELAYS")
            .unwrap_or_else(|_| "wss://relay.damus.io,wss://nos.lol".to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let retention_hours: u64 = std::env::var("BLOBDVM_RETENTION_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()?;

        let max_file_size: usize = std::env::var("BLOBDVM_MAX_FILE_SIZE")
            .unwrap_or_else(|_| dvm_core::MAX_FILE_SIZE.to_string())
            .parse()?;

        let response_timeout_secs: u64 = std::env::var("BLOBDVM_RESPONSE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;

        Ok(Config {
            relays,
            retention_secs: retention_hours * 3600,
            max_file_size,
            response_timeout_secs,
        })
    }
}

/// Parses a private key given as either hex or bech32 (`nsec1...`).
pub fn load_keys(private_key: &str) -> anyhow::Result<Keys> {
    Keys::parse(private_key).map_err(|e| anyhow::anyhow!("invalid private key: {e}"))
}

/// A fresh keypair, used when no `--private-key` is given to commands that
/// only need to sign outgoing requests (not receive replies as a known
/// identity across restarts).
pub fn ephemeral_keys() -> Keys {
    Keys::generate()
}
