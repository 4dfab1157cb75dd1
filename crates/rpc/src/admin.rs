//! Admin gateway: shared-secret gated listing, deletion, backup and restore.
//!
//! The secret is checked on every call; there is no session. A mismatch is
//! reported as [`AdminError::Forbidden`] whatever the operation.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, Redirect, Response};
use filelink_registry::{FileDescriptor, RegistryError, RegistryStore, Token};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use url::form_urlencoded;

use crate::landing::html_escape;
use crate::server::{ApiError, SharedState};

/// Filename offered for downloaded backups.
pub const BACKUP_FILE_NAME: &str = "database_backup.json";

/// Multipart field carrying an uploaded backup.
pub const RESTORE_FIELD: &str = "backup_file";

/// Admin errors
#[derive(thiserror::Error, Debug)]
pub enum AdminError {
    #[error("Forbidden")]
    Forbidden,
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("Registry error: {0}")]
    Registry(RegistryError),
}

impl From<RegistryError> for AdminError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::MalformedSnapshot(msg) => AdminError::MalformedSnapshot(msg),
            other => AdminError::Registry(other),
        }
    }
}

pub struct AdminGateway {
    registry: Arc<RegistryStore>,
    secret: String,
}

impl AdminGateway {
    pub fn new(registry: Arc<RegistryStore>, secret: impl Into<String>) -> Self {
        Self {
            registry,
            secret: secret.into(),
        }
    }

    /// Compare `supplied` with the configured secret in constant time.
    pub fn authorize(&self, supplied: Option<&str>) -> Result<(), AdminError> {
        let Some(supplied) = supplied else {
            return Err(AdminError::Forbidden);
        };
        if self.secret.is_empty() {
            return Err(AdminError::Forbidden);
        }

        if bool::from(supplied.as_bytes().ct_eq(self.secret.as_bytes())) {
            Ok(())
        } else {
            Err(AdminError::Forbidden)
        }
    }

    pub fn list(&self, key: Option<&str>) -> Result<Vec<(Token, FileDescriptor)>, AdminError> {
        self.authorize(key)?;
        Ok(self.registry.list())
    }

    /// Returns whether the token existed.
    pub fn delete(&self, key: Option<&str>, token: &Token) -> Result<bool, AdminError> {
        self.authorize(key)?;
        let removed = self.registry.delete(token)?;
        info!(token = %token, removed, "Admin delete");
        Ok(removed)
    }

    pub fn export_snapshot(&self, key: Option<&str>) -> Result<Vec<u8>, AdminError> {
        self.authorize(key)?;
        Ok(self.registry.export_snapshot()?)
    }

    /// Replace the whole registry. Nothing changes unless the artifact parses
    /// and validates completely.
    pub fn restore_snapshot(&self, key: Option<&str>, bytes: &[u8]) -> Result<usize, AdminError> {
        self.authorize(key)?;
        let entries = self.registry.restore_snapshot(bytes)?;
        info!(entries, "Admin restore applied");
        Ok(entries)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AdminKey {
    #[serde(default)]
    key: Option<String>,
}

impl AdminKey {
    /// An unparseable query string counts as no key at all.
    fn from_query(query: Result<Query<AdminKey>, QueryRejection>) -> Self {
        query.map(|Query(params)| params).unwrap_or_default()
    }

    fn as_deref(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

fn panel_url(key: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
    format!("/admin?key={encoded}")
}

pub(crate) async fn handle_admin_panel(
    State(state): State<SharedState>,
    query: Result<Query<AdminKey>, QueryRejection>,
) -> Result<Html<String>, ApiError> {
    state.record_request();
    let params = AdminKey::from_query(query);
    let entries = state.admin.list(params.as_deref())?;
    Ok(Html(render_admin_panel(params.as_deref().unwrap_or_default(), &entries)))
}

pub(crate) async fn handle_admin_delete(
    State(state): State<SharedState>,
    AxumPath(token): AxumPath<String>,
    query: Result<Query<AdminKey>, QueryRejection>,
) -> Result<Redirect, ApiError> {
    state.record_request();
    let params = AdminKey::from_query(query);
    let key = params.as_deref();
    state.admin.delete(key, &Token::new(token))?;
    Ok(Redirect::to(&panel_url(key.unwrap_or_default())))
}

pub(crate) async fn handle_admin_backup(
    State(state): State<SharedState>,
    query: Result<Query<AdminKey>, QueryRejection>,
) -> Result<Response, ApiError> {
    state.record_request();
    let params = AdminKey::from_query(query);
    let snapshot = state.admin.export_snapshot(params.as_deref())?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{BACKUP_FILE_NAME}\""),
        )
        .body(Body::from(snapshot))
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}

pub(crate) async fn handle_admin_restore(
    State(state): State<SharedState>,
    query: Result<Query<AdminKey>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Redirect, ApiError> {
    state.record_request();
    let params = AdminKey::from_query(query);
    let key = params.as_deref();
    // Secret first so a bad key is rejected the same way whatever the body holds.
    state.admin.authorize(key)?;

    let mut multipart =
        multipart.map_err(|e| ApiError::bad_request(format!("expected multipart upload: {e}")))?;
    let bytes = read_backup_field(&mut multipart).await?;

    match state.admin.restore_snapshot(key, &bytes) {
        Ok(_) => Ok(Redirect::to(&panel_url(key.unwrap_or_default()))),
        Err(err) => {
            warn!(error = %err, "Restore rejected");
            Err(err.into())
        }
    }
}

async fn read_backup_field(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some(RESTORE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?;
            return Ok(bytes.to_vec());
        }
    }
    Err(ApiError::bad_request(format!(
        "missing `{RESTORE_FIELD}` upload"
    )))
}

pub fn render_admin_panel(key: &str, entries: &[(Token, FileDescriptor)]) -> String {
    let key_param = html_escape(&form_urlencoded::byte_serialize(key.as_bytes()).collect::<String>());

    let mut rows = String::new();
    for (token, descriptor) in entries {
        let token_param: String = form_urlencoded::byte_serialize(token.as_str().as_bytes()).collect();
        let token_param = html_escape(&token_param);
        rows.push_str(&format!(
            r#"            <tr>
                <td>{name}</td>
                <td>{size:.2} MB</td>
                <td>
                    <a href="/file/{token_param}" target="_blank" class="btn view">OPEN</a>
                    <a href="/admin/delete/{token_param}?key={key_param}" class="btn del">DEL</a>
                </td>
            </tr>
"#,
            name = html_escape(&descriptor.display_name),
            size = descriptor.size_mib(),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Admin</title>
    <style>
        body {{ font-family: sans-serif; padding: 20px; background: #f4f4f4; }}
        table {{ width: 100%; border-collapse: collapse; background: white; }}
        th, td {{ padding: 12px; border-bottom: 1px solid #ddd; text-align: left; }}
        th {{ background: #333; color: white; }}
        .btn {{ padding: 5px 10px; color: white; text-decoration: none; border-radius: 3px; font-size: 12px; margin-right: 5px; }}
        .view {{ background: #2196F3; }} .del {{ background: #f44336; }} .dl {{ background: #ff9800; }}
        .backup-box {{ background: white; padding: 15px; margin-bottom: 20px; border-radius: 5px; border-left: 5px solid #ff9800; }}
        form {{ display: inline-block; margin-left: 20px; }}
    </style>
</head>
<body>
    <h1>Admin Panel</h1>
    <div class="backup-box">
        <strong>Backup/Restore:</strong>
        <a href="/admin/backup?key={key_param}" class="btn dl">DOWNLOAD DB</a>
        <form action="/admin/restore?key={key_param}" method="post" enctype="multipart/form-data">
            <input type="file" name="{RESTORE_FIELD}" required>
            <button type="submit" class="btn del">RESTORE</button>
        </form>
    </div>
    <p>{count} file(s) registered.</p>
    <table>
        <thead><tr><th>File</th><th>Size</th><th>Actions</th></tr></thead>
        <tbody>
{rows}        </tbody>
    </table>
</body>
</html>
"#,
        count = entries.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use filelink_registry::OwnerRef;
    use tempfile::TempDir;

    fn gateway() -> (TempDir, Arc<RegistryStore>, AdminGateway) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RegistryStore::open(dir.path().join("database.json")));
        let gateway = AdminGateway::new(registry.clone(), "s3cret");
        (dir, registry, gateway)
    }

    fn seed(registry: &RegistryStore, token: &str) {
        registry
            .put(
                Token::new(token),
                FileDescriptor::new("R-".to_string() + token, "a.bin", None, 10, OwnerRef(1)),
            )
            .unwrap();
    }

    #[test]
    fn test_authorize() {
        let (_dir, _registry, gateway) = gateway();
        assert!(gateway.authorize(Some("s3cret")).is_ok());
        assert!(matches!(gateway.authorize(Some("s3cre")), Err(AdminError::Forbidden)));
        assert!(matches!(gateway.authorize(Some("S3CRET")), Err(AdminError::Forbidden)));
        assert!(matches!(gateway.authorize(Some("s3cret-and-more")), Err(AdminError::Forbidden)));
        assert!(matches!(gateway.authorize(Some("")), Err(AdminError::Forbidden)));
        assert!(matches!(gateway.authorize(None), Err(AdminError::Forbidden)));
    }

    #[test]
    fn test_empty_secret_never_authorizes() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(RegistryStore::open(dir.path().join("database.json")));
        let gateway = AdminGateway::new(registry, "");
        assert!(matches!(gateway.authorize(Some("")), Err(AdminError::Forbidden)));
    }

    #[test]
    fn test_forbidden_operations_leave_registry_alone() {
        let (_dir, registry, gateway) = gateway();
        seed(&registry, "t1");
        let before = registry.export_snapshot().unwrap();

        let bad = Some("wrong");
        assert!(matches!(gateway.list(bad), Err(AdminError::Forbidden)));
        assert!(matches!(gateway.delete(bad, &Token::new("t1")), Err(AdminError::Forbidden)));
        assert!(matches!(gateway.export_snapshot(bad), Err(AdminError::Forbidden)));
        assert!(matches!(gateway.restore_snapshot(bad, b"{}"), Err(AdminError::Forbidden)));

        assert_eq!(registry.export_snapshot().unwrap(), before);
    }

    #[test]
    fn test_malformed_restore_is_reported() {
        let (_dir, registry, gateway) = gateway();
        seed(&registry, "t1");

        let err = gateway.restore_snapshot(Some("s3cret"), b"not json").unwrap_err();
        assert!(matches!(err, AdminError::MalformedSnapshot(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_panel_escapes_names() {
        let entries = vec![(
            Token::new("t1"),
            FileDescriptor::new("R1", "<img src=x>.png", None, 1024 * 1024, OwnerRef(1)),
        )];
        let page = render_admin_panel("k&y", &entries);
        assert!(page.contains("&lt;img src=x&gt;.png"));
        assert!(page.contains("1.00 MB"));
        assert!(page.contains("/admin/delete/t1?key=k%26y"));
        assert!(page.contains(r#"name="backup_file""#));
    }
}
