//! Content-source seam: exchanging upstream references for direct locators.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use filelink_botapi::BotClient;
use parking_lot::RwLock;

/// Short-lived, directly fetchable location of a file's bytes.
///
/// Obtained per request and never persisted: it expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectLocator {
    pub url: String,
    /// Size reported by the content source during the exchange, if any.
    pub size_hint: Option<u64>,
}

/// Service that turns a stable upstream reference into a [`DirectLocator`].
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fails when the reference is invalid, revoked or the source is unreachable.
    async fn exchange(&self, upstream_ref: &str) -> Result<DirectLocator>;
}

/// Content source backed by the chat platform's Bot API (`getFile`).
#[derive(Debug, Clone)]
pub struct BotContentSource {
    client: BotClient,
}

impl BotContentSource {
    pub fn new(client: BotClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentSource for BotContentSource {
    async fn exchange(&self, upstream_ref: &str) -> Result<DirectLocator> {
        let file = self.client.get_file(upstream_ref).await?;
        let path = file
            .file_path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("content source returned no file path"))?;

        Ok(DirectLocator {
            url: self.client.file_url(&path),
            size_hint: file.file_size,
        })
    }
}

/// Stub implementation for testing/local mode without a chat platform.
#[derive(Default)]
pub struct StubContentSource {
    locators: RwLock<HashMap<String, String>>,
}

impl StubContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `url` for `upstream_ref` from now on.
    pub fn insert(&self, upstream_ref: impl Into<String>, url: impl Into<String>) {
        self.locators.write().insert(upstream_ref.into(), url.into());
    }

    /// Simulate a revoked reference.
    pub fn revoke(&self, upstream_ref: &str) {
        self.locators.write().remove(upstream_ref);
    }
}

#[async_trait]
impl ContentSource for StubContentSource {
    async fn exchange(&self, upstream_ref: &str) -> Result<DirectLocator> {
        let url = self
            .locators
            .read()
            .get(upstream_ref)
            .cloned()
            .ok_or_else(|| anyhow!("stub: unknown upstream reference {upstream_ref}"))?;

        Ok(DirectLocator {
            url,
            size_hint: None,
        })
    }
}
