//! `GET /stream/:token`: relay a registered file to the client.

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use filelink_registry::{Token, DEFAULT_MIME_TYPE};
use filelink_relay::ProxyResponse;

use crate::server::{ApiError, SharedState};

pub(crate) async fn handle_stream(
    State(state): State<SharedState>,
    AxumPath(token): AxumPath<String>,
) -> Result<Response, ApiError> {
    state.record_request();
    let token = Token::new(token);

    // Registry lookup and upstream exchange; nothing is sent before both succeed.
    let resolved = state.resolver.resolve(&token).await?;
    let relay = state.proxy.open(&resolved).await?;

    relay_response(relay)
}

fn relay_response(relay: ProxyResponse) -> Result<Response, ApiError> {
    let content_type = HeaderValue::from_str(&relay.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE));
    let disposition = HeaderValue::from_str(&relay.content_disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition);
    if let Some(length) = relay.content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }

    builder
        .body(Body::from_stream(relay.body))
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}
