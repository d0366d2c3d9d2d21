//! Incremental double-newline frame splitter for event streams.
//!
//! Handles:
//! - Partial frames across TCP chunks
//! - Several frames coalesced into one chunk
//! - A trailing CR before the boundary
//! - A final unterminated frame at end of input
//!
//! The splitter consumes the first of the two boundary newlines only, so every
//! token after the first begins with the leftover `\n`. The event router drops
//! that leading byte (see [`crate::router::EventNames::leading_artifact`]).

use crate::error::Error;
use bytes::{Bytes, BytesMut};
use futures::{ready, Stream};
use memchr::memmem;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Default cap on a single buffered frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Outcome of one [`split_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A complete token. The caller must discard `consumed` bytes from the
    /// front of its buffer before calling again.
    Token { consumed: usize, token: &'a [u8] },
    /// No boundary yet; feed more bytes.
    NeedMore,
    /// End of input with nothing left buffered.
    End,
}

/// Split the next token off `buf`.
///
/// Stateless: identical `buf`/`at_eof` always give the same answer.
pub fn split_frame(buf: &[u8], at_eof: bool) -> Frame<'_> {
    if at_eof && buf.is_empty() {
        return Frame::End;
    }
    if let Some(i) = memmem::find(buf, b"\n\n") {
        return Frame::Token {
            consumed: i + 1,
            token: drop_cr(&buf[..i]),
        };
    }
    if at_eof {
        return Frame::Token {
            consumed: buf.len(),
            token: drop_cr(buf),
        };
    }
    Frame::NeedMore
}

/// Drop one terminal `\r`.
#[inline]
fn drop_cr(data: &[u8]) -> &[u8] {
    data.strip_suffix(b"\r").unwrap_or(data)
}

pin_project! {
    /// Turns a stream of byte chunks into a stream of frame tokens.
    ///
    /// Tokens are split off the internal buffer without copying.
    pub struct TokenStream<S> {
        #[pin]
        inner: S,
        buffer: BytesMut,
        max_frame_len: usize,
        eof: bool,
        failed: bool,
    }
}

impl<S> TokenStream<S> {
    /// Wrap a byte stream with the default frame limit.
    pub fn new(inner: S) -> Self {
        Self::with_max_frame_len(inner, DEFAULT_MAX_FRAME_LEN)
    }

    /// Wrap a byte stream, failing once a frame outgrows `max_frame_len`.
    pub fn with_max_frame_len(inner: S, max_frame_len: usize) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(8192),
            max_frame_len,
            eof: false,
            failed: false,
        }
    }

    /// Bytes buffered but not yet emitted.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

impl<S, B, E> Stream for TokenStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<Error>,
{
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.failed {
            return Poll::Ready(None);
        }

        loop {
            let next = match split_frame(&this.buffer[..], *this.eof) {
                Frame::Token { consumed, token } => Some((consumed, token.len())),
                Frame::NeedMore => None,
                Frame::End => return Poll::Ready(None),
            };

            if let Some((consumed, len)) = next {
                let mut head = this.buffer.split_to(consumed);
                head.truncate(len);
                return Poll::Ready(Some(Ok(head.freeze())));
            }

            if this.buffer.len() > *this.max_frame_len {
                *this.failed = true;
                return Poll::Ready(Some(Err(Error::FrameTooLarge(*this.max_frame_len))));
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    *this.failed = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                None => *this.eof = true,
            }
        }
    }
}
