//! Filelink relay
//!
//! Serves registered files by exchanging each descriptor's upstream reference
//! for a short-lived direct locator and streaming the bytes to the client.
//! Nothing here persists state; every request does its own exchange.

pub mod proxy;
pub mod resolver;
pub mod source;
pub mod stats;

pub use proxy::{inline_disposition, ProxyResponse, RelayBody, StreamingProxy, CHUNK_SIZE};
pub use resolver::{RelayResolver, ResolvedSource};
pub use source::{BotContentSource, ContentSource, DirectLocator, StubContentSource};
pub use stats::{RelayStats, RelayStatsSnapshot};

/// Relay errors
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("File not found")]
    NotFound,
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}
