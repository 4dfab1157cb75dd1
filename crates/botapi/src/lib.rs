//! Filelink Bot API client
//!
//! Talks to the chat platform that owns the uploaded bytes. The same client
//! serves the ingestion loop (`getUpdates`, `sendMessage`) and the relay
//! (`getFile` plus direct file URLs).

pub mod client;
pub mod types;

pub use client::{BotApiError, BotClient};
pub use types::{Audio, Chat, Document, File, Message, Update, User, Video};
