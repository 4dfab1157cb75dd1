//! Filelink file registry
//!
//! Maps opaque tokens to file descriptors. The registry never stores file
//! content; descriptors point at bytes held by an external content source.
//! The whole mapping is persisted as a single JSON artifact that doubles as
//! the backup/restore format.

pub mod descriptor;
pub mod store;
pub mod token;

pub use descriptor::{FileDescriptor, OwnerRef, DEFAULT_MIME_TYPE};
pub use store::{parse_snapshot, RegistryError, RegistryStore, Snapshot};
pub use token::{RandomTokenIssuer, Token, TokenIssuer};

#[cfg(test)]
mod tests;
