//! `GET /file/:token`: countdown page that forwards to the stream.

use axum::extract::{Path as AxumPath, State};
use axum::response::Html;
use filelink_registry::Token;

use crate::server::{ApiError, SharedState};

pub(crate) async fn handle_landing(
    State(state): State<SharedState>,
    AxumPath(token): AxumPath<String>,
) -> Result<Html<String>, ApiError> {
    state.record_request();
    let token = Token::new(token);
    let descriptor = state
        .registry
        .get(&token)
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    Ok(Html(render_landing_page(
        &token,
        &descriptor.display_name,
        state.landing_delay.as_secs(),
    )))
}

/// Escape text for use in HTML content and quoted attributes.
pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn render_landing_page(token: &Token, file_name: &str, delay_secs: u64) -> String {
    let stream_url = html_escape(&format!("/stream/{token}"));
    let file_name = html_escape(file_name);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta http-equiv="refresh" content="{delay_secs};url={stream_url}">
    <title>Download</title>
    <style>
        body {{ font-family: sans-serif; background: #f0f2f5; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; }}
        .card {{ background: white; padding: 2rem; border-radius: 12px; box-shadow: 0 4px 12px rgba(0,0,0,0.1); text-align: center; max-width: 400px; width: 100%; }}
        .spinner {{ border: 4px solid #f3f3f3; border-top: 4px solid #3498db; border-radius: 50%; width: 40px; height: 40px; animation: spin 1s linear infinite; margin: 0 auto 1rem; }}
        @keyframes spin {{ 0% {{ transform: rotate(0deg); }} 100% {{ transform: rotate(360deg); }} }}
        #timer {{ font-weight: bold; color: #3498db; }}
        .filename {{ background: #eee; padding: 5px; border-radius: 4px; font-family: monospace; display: block; margin-top: 10px; word-break: break-all; }}
    </style>
</head>
<body>
    <div class="card">
        <div class="spinner"></div>
        <h3>Preparing File...</h3>
        <span class="filename">{file_name}</span>
        <p>Stream starts in <span id="timer">{delay_secs}</span>s.</p>
        <p id="status"><a href="{stream_url}">Start now</a></p>
    </div>
    <script>
        let timeLeft = {delay_secs};
        function tick() {{
            document.getElementById('timer').innerText = timeLeft;
            if (timeLeft <= 0) {{
                document.getElementById('status').innerText = "Starting stream...";
            }} else {{
                timeLeft--;
                setTimeout(tick, 1000);
            }}
        }}
        tick();
    </script>
</body>
</html>
"#
    )
}
