//! Ingestion core: size cap, token issue and registration.

use std::sync::Arc;

use filelink_registry::{RegistryError, RegistryStore, Token, TokenIssuer};
use tracing::{info, warn};

use crate::upload::Upload;

/// Default cap on registered file size (20 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

const MAX_TOKEN_ATTEMPTS: usize = 4;

/// Ingestion errors
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("Payload too large: {size_bytes} bytes exceeds limit of {max_bytes}")]
    PayloadTooLarge { size_bytes: u64, max_bytes: u64 },
    #[error("Could not issue a unique token")]
    TokenExhausted,
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub struct Ingestor {
    registry: Arc<RegistryStore>,
    issuer: Arc<dyn TokenIssuer>,
    max_upload_bytes: u64,
}

impl Ingestor {
    pub fn new(
        registry: Arc<RegistryStore>,
        issuer: Arc<dyn TokenIssuer>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            registry,
            issuer,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Register `upload` under a fresh token.
    ///
    /// Oversized uploads are rejected before a token is drawn; the registry
    /// is not touched.
    pub fn ingest(&self, upload: Upload) -> Result<Token, IngestError> {
        let size_bytes = upload.kind.size_bytes();
        if size_bytes > self.max_upload_bytes {
            warn!(
                owner = %upload.owner,
                kind = upload.kind.label(),
                size_bytes,
                max_bytes = self.max_upload_bytes,
                "Upload rejected: too large"
            );
            return Err(IngestError::PayloadTooLarge {
                size_bytes,
                max_bytes: self.max_upload_bytes,
            });
        }

        let token = self.fresh_token()?;
        let kind = upload.kind.label();
        let descriptor = upload.kind.into_descriptor(upload.owner);
        let display_name = descriptor.display_name.clone();

        self.registry.put(token.clone(), descriptor)?;

        info!(
            token = %token,
            owner = %upload.owner,
            kind,
            name = %display_name,
            size_bytes,
            "Upload registered"
        );
        Ok(token)
    }

    fn fresh_token(&self) -> Result<Token, IngestError> {
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let token = self.issuer.new_token();
            if self.registry.get(&token).is_none() {
                return Ok(token);
            }
            warn!(token = %token, "Issued token already registered, drawing again");
        }
        Err(IngestError::TokenExhausted)
    }
}
