//! Filelink HTTP surface
//!
//! Landing pages, the streaming relay endpoint, the secret-gated admin
//! gateway and operational endpoints, all on one axum router.

pub mod admin;
pub mod landing;
pub mod server;
pub mod stream;

pub use admin::{AdminError, AdminGateway, BACKUP_FILE_NAME, RESTORE_FIELD};
pub use server::{build_router, start_server, AppState, MAX_RESTORE_BYTES};
