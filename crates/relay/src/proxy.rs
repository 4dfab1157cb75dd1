//! Streaming proxy: forwards upstream bytes to the client without buffering
//! the payload.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use filelink_registry::{FileDescriptor, Token};
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::resolver::ResolvedSource;
use crate::stats::RelayStats;
use crate::RelayError;

/// Size of every forwarded chunk except possibly the last.
pub const CHUNK_SIZE: usize = 4096;

/// Response metadata plus the body, ready to be written to the client.
pub struct ProxyResponse {
    pub content_type: String,
    pub content_disposition: String,
    /// Present only when the upstream reported one.
    pub content_length: Option<u64>,
    pub body: RelayBody,
}

pub struct StreamingProxy {
    http: Client,
    stats: Arc<RelayStats>,
}

impl StreamingProxy {
    pub fn new(http: Client, stats: Arc<RelayStats>) -> Self {
        Self { http, stats }
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Open the upstream connection and prepare the client response.
    ///
    /// Failures here happen before any header is committed and surface as
    /// [`RelayError::UpstreamUnavailable`].
    pub async fn open(&self, resolved: &ResolvedSource) -> Result<ProxyResponse, RelayError> {
        let response = self
            .http
            .get(&resolved.locator.url)
            .send()
            .await
            .map_err(|err| {
                let err = err.without_url();
                warn!(token = %resolved.token, error = %err, "Upstream fetch failed");
                RelayError::UpstreamUnavailable(format!("fetch failed: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(token = %resolved.token, %status, "Upstream refused fetch");
            return Err(RelayError::UpstreamUnavailable(format!(
                "upstream returned {status}"
            )));
        }

        let content_length = response.content_length();
        // Direct locators can embed credentials; strip them from stream errors.
        let upstream = response.bytes_stream().map_err(reqwest::Error::without_url);

        info!(
            token = %resolved.token,
            name = %resolved.descriptor.display_name,
            content_length = ?content_length,
            "Relaying file"
        );

        Ok(ProxyResponse {
            content_type: resolved.descriptor.mime_type.clone(),
            content_disposition: inline_disposition(&resolved.descriptor),
            content_length,
            body: RelayBody::new(
                resolved.token.clone(),
                upstream,
                content_length,
                Arc::clone(&self.stats),
            ),
        })
    }
}

/// Byte stream handed to the HTTP server.
///
/// Re-chunks upstream data into [`CHUNK_SIZE`] pieces. Dropping it before the
/// upstream is exhausted (client went away) drops the upstream connection.
pub struct RelayBody {
    token: Token,
    upstream: Option<BoxStream<'static, io::Result<Bytes>>>,
    pending: BytesMut,
    forwarded: u64,
    expected: Option<u64>,
    finished: bool,
    stats: Arc<RelayStats>,
}

impl RelayBody {
    pub fn new<S, B, E>(
        token: Token,
        upstream: S,
        expected: Option<u64>,
        stats: Arc<RelayStats>,
    ) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        stats.record_started();
        let upstream = upstream
            .map_ok(Into::into)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
            .boxed();

        Self {
            token,
            upstream: Some(upstream),
            pending: BytesMut::with_capacity(CHUNK_SIZE),
            forwarded: 0,
            expected,
            finished: false,
            stats,
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    fn emit(&mut self, chunk: Bytes) -> Bytes {
        self.forwarded += chunk.len() as u64;
        self.stats.record_bytes(chunk.len());
        chunk
    }

    fn finish(&mut self) {
        self.finished = true;
        match self.expected {
            Some(expected) if self.forwarded < expected => {
                warn!(
                    token = %self.token,
                    forwarded = self.forwarded,
                    expected,
                    "Upstream closed early, transfer truncated"
                );
                self.stats.record_failed();
            }
            _ => {
                debug!(token = %self.token, forwarded = self.forwarded, "Relay complete");
                self.stats.record_completed();
            }
        }
    }
}

impl Stream for RelayBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.pending.len() >= CHUNK_SIZE {
                let chunk = this.pending.split_to(CHUNK_SIZE).freeze();
                return Poll::Ready(Some(Ok(this.emit(chunk))));
            }

            let Some(upstream) = this.upstream.as_mut() else {
                if !this.pending.is_empty() {
                    let chunk = this.pending.split().freeze();
                    return Poll::Ready(Some(Ok(this.emit(chunk))));
                }
                if !this.finished {
                    this.finish();
                }
                return Poll::Ready(None);
            };

            match upstream.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(bytes))) => this.pending.extend_from_slice(&bytes),
                Poll::Ready(None) => this.upstream = None,
                Poll::Ready(Some(Err(err))) => {
                    // Headers are already on the wire; all we can do is cut the response.
                    warn!(
                        token = %this.token,
                        forwarded = this.forwarded,
                        error = %err,
                        "Upstream failed mid-stream, closing response"
                    );
                    this.upstream = None;
                    this.pending.clear();
                    this.finished = true;
                    this.stats.record_failed();
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }
}

impl Drop for RelayBody {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                token = %self.token,
                forwarded = self.forwarded,
                "Client disconnected, upstream released"
            );
            self.stats.record_cancelled();
        }
    }
}

/// `inline` disposition naming the descriptor's file.
///
/// Emits an ASCII `filename` fallback and, for non-ASCII names, an RFC 5987
/// `filename*` parameter.
pub fn inline_disposition(descriptor: &FileDescriptor) -> String {
    let name = descriptor.display_name.as_str();
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_control() => '_',
            c if !c.is_ascii() => '_',
            c => c,
        })
        .collect();

    if name.is_ascii() {
        format!("inline; filename=\"{fallback}\"")
    } else {
        format!(
            "inline; filename=\"{fallback}\"; filename*=UTF-8''{}",
            percent_encode_attr(name)
        )
    }
}

fn percent_encode_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~');
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use filelink_registry::OwnerRef;
    use futures::stream;

    fn body_from(chunks: Vec<Result<Vec<u8>, io::Error>>, expected: Option<u64>) -> (RelayBody, Arc<RelayStats>) {
        let stats = Arc::new(RelayStats::new());
        let body = RelayBody::new(Token::new("t"), stream::iter(chunks), expected, stats.clone());
        (body, stats)
    }

    #[tokio::test]
    async fn test_rechunks_into_fixed_sizes() {
        let chunks = vec![Ok(vec![1u8; 1000]), Ok(vec![2u8; 5000]), Ok(vec![3u8; 3000])];
        let (body, stats) = body_from(chunks, Some(9000));

        let out: Vec<Bytes> = body.try_collect().await.unwrap();
        let sizes: Vec<usize> = out.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![4096, 4096, 808]);
        assert_eq!(out.iter().map(Bytes::len).sum::<usize>(), 9000);
        assert_eq!(out[0][999], 1);
        assert_eq!(out[0][1000], 2);

        let snap = stats.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.bytes, 9000);
        assert_eq!(snap.active(), 0);
    }

    #[tokio::test]
    async fn test_upstream_error_ends_stream() {
        let chunks = vec![
            Ok(vec![0u8; 5000]),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(vec![0u8; 10]),
        ];
        let (mut body, stats) = body_from(chunks, None);

        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first.len(), CHUNK_SIZE);
        assert!(body.next().await.unwrap().is_err());
        assert!(body.next().await.is_none());

        drop(body);
        let snap = stats.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.cancelled, 0);
    }

    #[tokio::test]
    async fn test_drop_before_end_counts_as_cancelled() {
        let chunks = vec![Ok(vec![0u8; 8192]), Ok(vec![0u8; 8192])];
        let (mut body, stats) = body_from(chunks, Some(16384));

        body.next().await.unwrap().unwrap();
        assert_eq!(body.forwarded(), 4096);
        drop(body);

        let snap = stats.snapshot();
        assert_eq!(snap.cancelled, 1);
        assert_eq!(snap.completed, 0);
    }

    #[tokio::test]
    async fn test_short_upstream_is_reported_failed() {
        let (body, stats) = body_from(vec![Ok(vec![0u8; 100])], Some(1000));
        let out: Vec<Bytes> = body.try_collect().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(stats.snapshot().failed, 1);
    }

    #[test]
    fn test_disposition() {
        let plain = FileDescriptor::new("R", "movie.mp4", None, 1, OwnerRef(1));
        assert_eq!(inline_disposition(&plain), "inline; filename=\"movie.mp4\"");

        let quoted = FileDescriptor::new("R", "a\"b\\c\r\n.txt", None, 1, OwnerRef(1));
        assert_eq!(inline_disposition(&quoted), "inline; filename=\"a_b_c__.txt\"");

        let unicode = FileDescriptor::new("R", "résumé.pdf", None, 1, OwnerRef(1));
        assert_eq!(
            inline_disposition(&unicode),
            "inline; filename=\"r_sum_.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
        );
    }
}
