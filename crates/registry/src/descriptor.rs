//! File descriptor data model for registered uploads.

use std::fmt;

use serde::{Deserialize, Serialize};

/// MIME type recorded when the platform did not report one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Opaque identifier of the principal that registered a file.
///
/// Chat platforms hand out signed 64-bit user ids; the registry never
/// interprets the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct OwnerRef(pub i64);

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File descriptor metadata record.
///
/// Holds everything needed to serve a file without storing its content. The
/// bytes stay with the content source and are reached through `upstream_ref`.
///
/// Field names on the wire match the historical `database.json` layout so
/// older backups restore unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Stable reference exchanged for a short-lived direct locator on every access.
    #[serde(rename = "file_id")]
    pub upstream_ref: String,

    /// Filename suggested to the client.
    #[serde(rename = "file_name")]
    pub display_name: String,

    #[serde(default = "default_mime_type")]
    pub mime_type: String,

    /// Size reported at registration time.
    #[serde(rename = "file_size")]
    pub size_bytes: u64,

    #[serde(rename = "uploader_id")]
    pub owner_ref: OwnerRef,
}

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.to_string()
}

impl FileDescriptor {
    /// Create a descriptor, falling back to the generic MIME type when none is known.
    pub fn new(
        upstream_ref: impl Into<String>,
        display_name: impl Into<String>,
        mime_type: Option<String>,
        size_bytes: u64,
        owner_ref: OwnerRef,
    ) -> Self {
        let mime_type = mime_type
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(default_mime_type);

        Self {
            upstream_ref: upstream_ref.into(),
            display_name: display_name.into(),
            mime_type,
            size_bytes,
            owner_ref,
        }
    }

    /// Validate the descriptor fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.upstream_ref.trim().is_empty() {
            return Err("upstream reference cannot be empty".to_string());
        }

        if self.display_name.is_empty() {
            return Err("display name cannot be empty".to_string());
        }

        if self.mime_type.len() > 255 {
            return Err("MIME type too long (max 255 chars)".to_string());
        }

        Ok(())
    }

    /// Size in mebibytes rounded to two decimals, for display.
    pub fn size_mib(&self) -> f64 {
        let mib = self.size_bytes as f64 / (1024.0 * 1024.0);
        (mib * 100.0).round() / 100.0
    }
}
