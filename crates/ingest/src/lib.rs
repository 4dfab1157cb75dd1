//! Filelink ingestion
//!
//! Turns uploads received by the chat bot into registry entries. Size limits
//! are enforced here, before any token is issued.

pub mod bot;
pub mod ingestor;
pub mod upload;

pub use bot::{BotLoop, BotLoopConfig};
pub use ingestor::{IngestError, Ingestor, DEFAULT_MAX_UPLOAD_BYTES};
pub use upload::{Upload, UploadKind};
