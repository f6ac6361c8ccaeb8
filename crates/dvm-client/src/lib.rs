//! The client side of BlobDVM: server discovery, upload, and download.
//!
//! Functions here take a `&dyn RelayClient` rather than owning one, so the
//! CLI's `cli` crate can share a single connected client across commands.

pub mod discovery;
pub mod download;
pub mod pending;
pub mod upload;

#[cfg(test)]
mod test_support;

pub use discovery::discover_servers;
pub use download::download;
pub use upload::upload;
