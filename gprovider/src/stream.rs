//! Cancellable byte streams relayed from upstream providers.
//!
//! ```rust
//! use bytes::Bytes;
//! use gcommon::HeaderMap;
//! use gprovider::ProviderStream;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let mut stream = ProviderStream::from_chunks(
//!     200,
//!     HeaderMap::new(),
//!     vec![Bytes::from_static(b"data: a\n\n"), Bytes::from_static(b"data: [DONE]\n\n")],
//! );
//!
//! let mut relayed = Vec::new();
//! stream
//!     .relay(&CancellationToken::new(), |chunk| {
//!         relayed.push(chunk);
//!         Ok(())
//!     })
//!     .await
//!     .expect("relay should finish");
//!
//! assert_eq!(relayed.len(), 2);
//! # });
//! ```

use std::fmt::{Debug, Formatter};
use std::pin::Pin;

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use gcommon::HeaderMap;
use tokio_util::sync::CancellationToken;

use crate::ProviderError;

pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send + 'a>>;

/// An open upstream streaming response.
///
/// Chunks are yielded in upstream order. Once the stream ends, fails, or is
/// cancelled it is closed and yields nothing further.
pub struct ProviderStream {
    status: u16,
    headers: HeaderMap,
    chunks: Option<ChunkStream<'static>>,
}

enum NextChunk {
    Cancelled,
    Item(Option<Result<Bytes, ProviderError>>),
}

impl ProviderStream {
    pub fn new(status: u16, headers: HeaderMap, chunks: ChunkStream<'static>) -> Self {
        Self {
            status,
            headers,
            chunks: Some(chunks),
        }
    }

    pub fn from_chunks(status: u16, headers: HeaderMap, chunks: Vec<Bytes>) -> Self {
        let source = futures_util::stream::iter(chunks.into_iter().map(Ok));
        Self::new(status, headers, Box::pin(source))
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_closed(&self) -> bool {
        self.chunks.is_none()
    }

    /// Releases the upstream connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.chunks = None;
    }

    pub async fn next_chunk(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, ProviderError> {
        let Some(chunks) = self.chunks.as_mut() else {
            return Ok(None);
        };

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => NextChunk::Cancelled,
            item = chunks.next() => NextChunk::Item(item),
        };

        match next {
            NextChunk::Cancelled => {
                self.close();
                Err(ProviderError::cancelled("stream cancelled by caller"))
            }
            NextChunk::Item(None) => {
                self.close();
                Ok(None)
            }
            NextChunk::Item(Some(Ok(chunk))) => Ok(Some(chunk)),
            NextChunk::Item(Some(Err(err))) => {
                self.close();
                Err(err)
            }
        }
    }

    /// Hands every chunk to `on_chunk` in order until the upstream ends.
    ///
    /// A callback error or cancellation stops the relay and closes the stream.
    pub async fn relay<F>(
        &mut self,
        cancel: &CancellationToken,
        mut on_chunk: F,
    ) -> Result<(), ProviderError>
    where
        F: FnMut(Bytes) -> Result<(), ProviderError>,
    {
        while let Some(chunk) = self.next_chunk(cancel).await? {
            if let Err(err) = on_chunk(chunk) {
                self.close();
                return Err(err);
            }
        }

        Ok(())
    }
}

impl Debug for ProviderStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Re-chunks a byte stream into newline-terminated lines, newline included.
///
/// A trailing fragment without a newline is flushed when the source ends.
pub fn split_lines<'a>(source: ChunkStream<'a>) -> ChunkStream<'a> {
    Box::pin(line_stream(source))
}

fn line_stream<'a>(
    mut source: ChunkStream<'a>,
) -> impl Stream<Item = Result<Bytes, ProviderError>> + Send + 'a {
    try_stream! {
        let mut buffer = BytesMut::new();

        while let Some(item) = source.next().await {
            let chunk = item?;
            buffer.extend_from_slice(&chunk);

            while let Some(index) = buffer.iter().position(|byte| *byte == b'\n') {
                yield buffer.split_to(index + 1).freeze();
            }
        }

        if !buffer.is_empty() {
            yield buffer.split().freeze();
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::StreamExt;
    use gcommon::HeaderMap;
    use tokio_util::sync::CancellationToken;

    use super::{ChunkStream, ProviderStream, split_lines};
    use crate::{ProviderError, ProviderErrorKind};

    #[tokio::test]
    async fn split_lines_rejoins_fragmented_lines() {
        let source: ChunkStream<'static> = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"a\"")),
            Ok(Bytes::from_static(b":1}\n\ndata: [DO")),
            Ok(Bytes::from_static(b"NE]\n\ntail")),
        ]));

        let lines = split_lines(source)
            .map(|line| line.expect("line should decode"))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(
            lines,
            vec![
                Bytes::from_static(b"data: {\"a\":1}\n"),
                Bytes::from_static(b"\n"),
                Bytes::from_static(b"data: [DONE]\n"),
                Bytes::from_static(b"\n"),
                Bytes::from_static(b"tail"),
            ]
        );
    }

    #[tokio::test]
    async fn next_chunk_after_end_keeps_returning_none() {
        let mut stream =
            ProviderStream::from_chunks(200, HeaderMap::new(), vec![Bytes::from_static(b"x")]);
        let cancel = CancellationToken::new();

        assert_eq!(
            stream.next_chunk(&cancel).await.expect("chunk"),
            Some(Bytes::from_static(b"x"))
        );
        assert_eq!(stream.next_chunk(&cancel).await.expect("end"), None);
        assert!(stream.is_closed());
        assert_eq!(stream.next_chunk(&cancel).await.expect("still end"), None);
    }

    #[tokio::test]
    async fn cancelled_token_closes_stream_with_cancelled_error() {
        let mut stream = ProviderStream::new(
            200,
            HeaderMap::new(),
            Box::pin(futures_util::stream::pending()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = stream
            .next_chunk(&cancel)
            .await
            .expect_err("cancelled stream should fail");

        assert!(err.is_cancelled());
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn relay_stops_on_callback_error() {
        let mut stream = ProviderStream::from_chunks(
            200,
            HeaderMap::new(),
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
        );
        let mut seen = 0;

        let err = stream
            .relay(&CancellationToken::new(), |_| {
                seen += 1;
                Err(ProviderError::transport("client went away"))
            })
            .await
            .expect_err("relay should surface callback error");

        assert_eq!(err.kind, ProviderErrorKind::Transport);
        assert_eq!(seen, 1);
        assert!(stream.is_closed());
    }
}
