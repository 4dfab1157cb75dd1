//! Persisted token registry.
//!
//! The committed mapping lives behind an `Arc` swapped under a short write
//! lock, so readers always see a fully persisted state. Mutations are
//! serialized by a separate writer mutex held for the whole
//! read-modify-write-persist cycle.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::descriptor::FileDescriptor;
use crate::token::Token;

/// Full point-in-time mapping. Ordered so exports are byte-stable.
pub type Snapshot = BTreeMap<Token, FileDescriptor>;

/// Registry errors
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Upstream reference for token {0} cannot change once set")]
    UpstreamRefImmutable(Token),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// File-backed registry mapping tokens to descriptors.
pub struct RegistryStore {
    path: PathBuf,
    committed: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl RegistryStore {
    /// Open the registry persisted at `path`.
    ///
    /// A missing or unreadable artifact yields an empty registry; the file is
    /// (re)created by the first mutation.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let snapshot = load_snapshot_file(&path);
        info!(
            path = %path.display(),
            entries = snapshot.len(),
            "Registry opened"
        );

        Self {
            path,
            committed: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a descriptor. Never blocks on an in-flight mutation.
    pub fn get(&self, token: &Token) -> Option<FileDescriptor> {
        self.committed.read().get(token).cloned()
    }

    /// Insert or overwrite the descriptor stored under `token`.
    ///
    /// Overwriting keeps the upstream reference fixed: a different
    /// `upstream_ref` for an existing token is rejected.
    pub fn put(&self, token: Token, descriptor: FileDescriptor) -> Result<()> {
        descriptor
            .validate()
            .map_err(RegistryError::InvalidDescriptor)?;

        let _guard = self.writer.lock();
        let current = self.current();

        if let Some(existing) = current.get(&token) {
            if existing.upstream_ref != descriptor.upstream_ref {
                return Err(RegistryError::UpstreamRefImmutable(token));
            }
        }

        let mut next = Snapshot::clone(&current);
        next.insert(token.clone(), descriptor);
        self.commit(next)?;

        debug!(token = %token, "Descriptor stored");
        Ok(())
    }

    /// Remove `token`, returning whether it existed.
    pub fn delete(&self, token: &Token) -> Result<bool> {
        let _guard = self.writer.lock();
        let current = self.current();

        if !current.contains_key(token) {
            return Ok(false);
        }

        let mut next = Snapshot::clone(&current);
        next.remove(token);
        self.commit(next)?;

        debug!(token = %token, "Descriptor deleted");
        Ok(true)
    }

    /// Serialize the committed mapping.
    pub fn export_snapshot(&self) -> Result<Vec<u8>> {
        let snapshot = self.current();
        Ok(serde_json::to_vec_pretty(snapshot.as_ref())?)
    }

    /// Replace the entire mapping with the one encoded in `bytes`.
    ///
    /// Parsing and validation complete before anything is written; on failure
    /// the existing registry is untouched. Returns the number of entries
    /// now registered.
    pub fn restore_snapshot(&self, bytes: &[u8]) -> Result<usize> {
        let next = parse_snapshot(bytes)?;
        let entries = next.len();

        let _guard = self.writer.lock();
        self.commit(next)?;

        info!(entries, "Registry restored from snapshot");
        Ok(entries)
    }

    /// All entries, ordered by token. Intended for administrative display.
    pub fn list(&self) -> Vec<(Token, FileDescriptor)> {
        self.current()
            .iter()
            .map(|(token, desc)| (token.clone(), desc.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.committed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Arc<Snapshot> {
        self.committed.read().clone()
    }

    // Caller must hold `writer`.
    fn commit(&self, next: Snapshot) -> Result<()> {
        write_snapshot_file(&self.path, &next)?;
        *self.committed.write() = Arc::new(next);
        Ok(())
    }
}

/// Decode and validate a snapshot artifact.
pub fn parse_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(RegistryError::MalformedSnapshot("snapshot is empty".to_string()));
    }

    let snapshot: Snapshot = serde_json::from_slice(bytes)
        .map_err(|e| RegistryError::MalformedSnapshot(e.to_string()))?;

    for (token, descriptor) in &snapshot {
        if token.as_str().trim().is_empty() {
            return Err(RegistryError::MalformedSnapshot(
                "snapshot contains an empty token".to_string(),
            ));
        }
        descriptor.validate().map_err(|e| {
            RegistryError::MalformedSnapshot(format!("entry {token}: {e}"))
        })?;
    }

    Ok(snapshot)
}

fn load_snapshot_file(path: &Path) -> Snapshot {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "No registry file yet, starting empty");
            return Snapshot::new();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Registry file unreadable, starting empty");
            return Snapshot::new();
        }
    };

    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Snapshot::new();
    }

    match serde_json::from_slice(&raw) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Registry file unparseable, starting empty");
            Snapshot::new()
        }
    }
}

/// Write the snapshot next to `path`, fsync it, then atomically rename over `path`.
fn write_snapshot_file(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let encoded = serde_json::to_vec_pretty(snapshot)?;

    let mut temp = NamedTempFile::new_in(&parent)?;
    temp.write_all(&encoded)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| RegistryError::Io(e.error))?;

    Ok(())
}
