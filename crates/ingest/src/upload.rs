//! Supported upload kinds and how each becomes a file descriptor.

use filelink_botapi::Message;
use filelink_registry::{FileDescriptor, OwnerRef};

/// One upload as received from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadKind {
    Document {
        upstream_ref: String,
        file_name: Option<String>,
        mime_type: Option<String>,
        size_bytes: u64,
    },
    Video {
        upstream_ref: String,
        file_name: Option<String>,
        mime_type: Option<String>,
        size_bytes: u64,
    },
    Audio {
        upstream_ref: String,
        title: Option<String>,
        file_name: Option<String>,
        mime_type: Option<String>,
        size_bytes: u64,
    },
}

/// An upload together with the principal that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub kind: UploadKind,
    pub owner: OwnerRef,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl UploadKind {
    /// Classify a message. Documents win over videos, videos over audio.
    ///
    /// A size the platform did not report is recorded as zero.
    pub fn from_message(message: &Message) -> Option<Self> {
        if let Some(doc) = &message.document {
            return Some(UploadKind::Document {
                upstream_ref: doc.file_id.clone(),
                file_name: doc.file_name.clone(),
                mime_type: doc.mime_type.clone(),
                size_bytes: doc.file_size.unwrap_or(0),
            });
        }
        if let Some(video) = &message.video {
            return Some(UploadKind::Video {
                upstream_ref: video.file_id.clone(),
                file_name: video.file_name.clone(),
                mime_type: video.mime_type.clone(),
                size_bytes: video.file_size.unwrap_or(0),
            });
        }
        message.audio.as_ref().map(|audio| UploadKind::Audio {
            upstream_ref: audio.file_id.clone(),
            title: audio.title.clone(),
            file_name: audio.file_name.clone(),
            mime_type: audio.mime_type.clone(),
            size_bytes: audio.file_size.unwrap_or(0),
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            UploadKind::Document { .. } => "document",
            UploadKind::Video { .. } => "video",
            UploadKind::Audio { .. } => "audio",
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match self {
            UploadKind::Document { size_bytes, .. }
            | UploadKind::Video { size_bytes, .. }
            | UploadKind::Audio { size_bytes, .. } => *size_bytes,
        }
    }

    /// Filename shown to downloaders.
    pub fn display_name(&self) -> String {
        let fallback = || format!("{}.file", self.label());
        match self {
            UploadKind::Document { file_name, .. } | UploadKind::Video { file_name, .. } => {
                non_empty(file_name).map(str::to_string).unwrap_or_else(fallback)
            }
            UploadKind::Audio {
                title, file_name, ..
            } => match non_empty(title) {
                Some(title) => format!("{title}.mp3"),
                None => non_empty(file_name).map(str::to_string).unwrap_or_else(fallback),
            },
        }
    }

    pub fn into_descriptor(self, owner: OwnerRef) -> FileDescriptor {
        let display_name = self.display_name();
        let size_bytes = self.size_bytes();
        let (upstream_ref, mime_type) = match self {
            UploadKind::Document {
                upstream_ref,
                mime_type,
                ..
            }
            | UploadKind::Video {
                upstream_ref,
                mime_type,
                ..
            }
            | UploadKind::Audio {
                upstream_ref,
                mime_type,
                ..
            } => (upstream_ref, mime_type),
        };

        FileDescriptor::new(upstream_ref, display_name, mime_type, size_bytes, owner)
    }
}

impl Upload {
    /// Build an upload from a message; `None` when it carries no supported file.
    ///
    /// Messages without a sender (channel posts) are attributed to the chat.
    pub fn from_message(message: &Message) -> Option<Self> {
        let kind = UploadKind::from_message(message)?;
        let owner = message
            .from
            .as_ref()
            .map(|user| user.id)
            .unwrap_or(message.chat.id);
        Some(Self {
            kind,
            owner: OwnerRef(owner),
        })
    }
}
