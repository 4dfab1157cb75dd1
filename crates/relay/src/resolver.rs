//! Token resolution: registry lookup followed by a fresh upstream exchange.

use std::sync::Arc;
use std::time::Duration;

use filelink_registry::{FileDescriptor, RegistryStore, Token};
use tracing::{debug, warn};

use crate::source::{ContentSource, DirectLocator};
use crate::RelayError;

/// A descriptor paired with a locator obtained for this request only.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub token: Token,
    pub descriptor: FileDescriptor,
    pub locator: DirectLocator,
}

pub struct RelayResolver {
    registry: Arc<RegistryStore>,
    source: Arc<dyn ContentSource>,
    exchange_timeout: Duration,
}

impl RelayResolver {
    pub fn new(
        registry: Arc<RegistryStore>,
        source: Arc<dyn ContentSource>,
        exchange_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            exchange_timeout,
        }
    }

    /// Look up `token` and exchange its upstream reference.
    ///
    /// The exchange runs on every call and is never retried.
    pub async fn resolve(&self, token: &Token) -> Result<ResolvedSource, RelayError> {
        let descriptor = self.registry.get(token).ok_or(RelayError::NotFound)?;

        let exchange = self.source.exchange(&descriptor.upstream_ref);
        let locator = match tokio::time::timeout(self.exchange_timeout, exchange).await {
            Ok(Ok(locator)) => locator,
            Ok(Err(err)) => {
                warn!(token = %token, error = %err, "Upstream exchange failed");
                return Err(RelayError::UpstreamUnavailable(err.to_string()));
            }
            Err(_) => {
                warn!(
                    token = %token,
                    timeout_ms = self.exchange_timeout.as_millis() as u64,
                    "Upstream exchange timed out"
                );
                return Err(RelayError::UpstreamUnavailable(format!(
                    "exchange timed out after {:?}",
                    self.exchange_timeout
                )));
            }
        };

        debug!(token = %token, size_hint = ?locator.size_hint, "Upstream locator obtained");
        Ok(ResolvedSource {
            token: token.clone(),
            descriptor,
            locator,
        })
    }
}
