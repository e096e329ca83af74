//! Raw request body buffering.
//!
//! Signature verification runs over the exact bytes the provider sent, so the
//! webhook route never uses a parsing extractor. The body stream is drained
//! into one contiguous buffer instead, and the read is all-or-nothing: a
//! transport error discards whatever was collected so far.

use axum::body::{Body, Bytes};
use futures::{pin_mut, Stream, StreamExt};
use thiserror::Error;

/// A single piece of an incoming body stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyChunk {
    Bytes(Bytes),
    /// Text chunks are stored as UTF-8.
    Text(String),
}

impl BodyChunk {
    fn as_bytes(&self) -> &[u8] {
        match self {
            BodyChunk::Bytes(b) => b,
            BodyChunk::Text(s) => s.as_bytes(),
        }
    }
}

impl From<Bytes> for BodyChunk {
    fn from(bytes: Bytes) -> Self {
        BodyChunk::Bytes(bytes)
    }
}

impl From<Vec<u8>> for BodyChunk {
    fn from(bytes: Vec<u8>) -> Self {
        BodyChunk::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for BodyChunk {
    fn from(text: String) -> Self {
        BodyChunk::Text(text)
    }
}

impl From<&str> for BodyChunk {
    fn from(text: &str) -> Self {
        BodyChunk::Text(text.to_string())
    }
}

/// Failure while buffering a request body.
#[derive(Debug, Error)]
pub enum StreamReadError {
    #[error("failed to read request body: {0}")]
    Transport(String),

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Concatenate every chunk of `stream` in arrival order.
///
/// Suspends until the stream signals completion. Returns an error without
/// any partial data if the stream yields an error or grows past `max_bytes`.
pub async fn buffer<S, C, E>(stream: S, max_bytes: usize) -> Result<Bytes, StreamReadError>
where
    S: Stream<Item = Result<C, E>>,
    C: Into<BodyChunk>,
    E: std::fmt::Display,
{
    pin_mut!(stream);

    let mut buf: Vec<u8> = Vec::new();

    while let Some(next) = stream.next().await {
        let chunk: BodyChunk = next
            .map_err(|e| StreamReadError::Transport(e.to_string()))?
            .into();
        let bytes = chunk.as_bytes();

        if buf.len() + bytes.len() > max_bytes {
            return Err(StreamReadError::TooLarge { limit: max_bytes });
        }

        buf.extend_from_slice(bytes);
    }

    Ok(Bytes::from(buf))
}

/// Buffer an axum request body.
pub async fn read_body(body: Body, max_bytes: usize) -> Result<Bytes, StreamReadError> {
    buffer(body.into_data_stream(), max_bytes).await
}
