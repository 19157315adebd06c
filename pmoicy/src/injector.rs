//! Interleaving of ICY metadata blocks into a raw audio byte stream.
//!
//! [`IcyInjector`] wraps an upstream [`AsyncRead`] and forwards its bytes
//! verbatim, except that after every `metaint` audio bytes it emits one
//! metadata block built from the current title. The title lives behind a
//! lock shared with any number of [`TitleHandle`]s, so a background task can
//! update it while the stream is being read.
//!
//! Reads never mix the tail of a metadata block with fresh audio: a call that
//! cannot drain the pending block returns only metadata bytes, and a call
//! that crosses an injection point stops at the boundary.

use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, trace};

use crate::block::encode_icy_block;

/// Audio bytes between two metadata blocks when nothing else is configured.
pub const DEFAULT_METAINT: usize = 16_000;

/// A metadata block waiting to be delivered, with its send cursor.
#[derive(Debug)]
struct PendingBlock {
    data: Bytes,
    sent: usize,
}

impl PendingBlock {
    fn remaining(&self) -> &[u8] {
        &self.data[self.sent..]
    }
}

/// Everything the read path and the title writers touch.
#[derive(Debug)]
struct IcyState {
    title: String,
    audio_bytes_sent: usize,
    pending: Option<PendingBlock>,
}

fn lock_state(state: &Mutex<IcyState>) -> MutexGuard<'_, IcyState> {
    // Critical sections never leave the state half-updated.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle used to replace the title of a running [`IcyInjector`].
///
/// Cloning is cheap; all clones address the same stream.
#[derive(Debug, Clone)]
pub struct TitleHandle {
    state: Arc<Mutex<IcyState>>,
}

impl TitleHandle {
    /// Replaces the current title.
    ///
    /// A block that is already pending keeps the title it was built with;
    /// the new title shows up in the next block.
    pub fn set_title(&self, title: impl Into<String>) {
        let title = title.into();
        let mut state = lock_state(&self.state);
        if state.title != title {
            debug!(title = %title, "Stream title updated");
        }
        state.title = title;
    }

    /// Returns a copy of the current title.
    pub fn title(&self) -> String {
        lock_state(&self.state).title.clone()
    }
}

/// Async reader injecting ICY metadata blocks into an upstream audio stream.
pub struct IcyInjector<R> {
    upstream: R,
    metaint: usize,
    state: Arc<Mutex<IcyState>>,
    deferred_error: Option<io::Error>,
}

impl<R> IcyInjector<R> {
    /// Wraps `upstream` with the default cadence of [`DEFAULT_METAINT`] bytes.
    pub fn new(upstream: R, title: impl Into<String>) -> Self {
        Self::with_metaint(upstream, DEFAULT_METAINT, title)
    }

    /// Wraps `upstream`, injecting a block every `metaint` audio bytes.
    ///
    /// # Panics
    ///
    /// Panics if `metaint` is zero.
    pub fn with_metaint(upstream: R, metaint: usize, title: impl Into<String>) -> Self {
        assert!(metaint > 0, "metaint must be positive");
        Self {
            upstream,
            metaint,
            state: Arc::new(Mutex::new(IcyState {
                title: title.into(),
                audio_bytes_sent: 0,
                pending: None,
            })),
            deferred_error: None,
        }
    }

    /// Returns a handle sharing this stream's title.
    pub fn title_handle(&self) -> TitleHandle {
        TitleHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Replaces the current title. See [`TitleHandle::set_title`].
    pub fn set_title(&self, title: impl Into<String>) {
        self.title_handle().set_title(title);
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for IcyInjector<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if let Some(err) = this.deferred_error.take() {
            return Poll::Ready(Err(err));
        }

        // Step 1: drain the pending block, then work out how much audio fits
        // before the next injection point.
        let mut flushed = 0;
        let room = {
            let mut state = lock_state(&this.state);

            if let Some(pending) = state.pending.as_mut() {
                let remaining = pending.remaining();
                let to_copy = remaining.len().min(buf.remaining());
                buf.put_slice(&remaining[..to_copy]);
                pending.sent += to_copy;

                if !pending.remaining().is_empty() {
                    return Poll::Ready(Ok(()));
                }

                state.pending = None;
                state.audio_bytes_sent = 0;
                flushed = to_copy;
            }

            this.metaint - state.audio_bytes_sent
        };

        let capacity = buf.remaining().min(room);
        if capacity == 0 {
            return Poll::Ready(Ok(()));
        }

        // Step 2: pull audio without holding the lock.
        let read = {
            let mut limited = ReadBuf::new(buf.initialize_unfilled_to(capacity));
            match Pin::new(&mut this.upstream).poll_read(cx, &mut limited) {
                Poll::Ready(Ok(())) => Ok(limited.filled().len()),
                Poll::Ready(Err(err)) => Err(err),
                Poll::Pending => {
                    if flushed > 0 {
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Pending;
                }
            }
        };

        let n = match read {
            Ok(n) => n,
            Err(err) if flushed > 0 => {
                // The metadata already sits in the caller's buffer.
                this.deferred_error = Some(err);
                return Poll::Ready(Ok(()));
            }
            Err(err) => return Poll::Ready(Err(err)),
        };
        buf.advance(n);

        // Step 3: account for the audio and arm the next block at the boundary.
        let mut state = lock_state(&this.state);
        state.audio_bytes_sent += n;
        if state.audio_bytes_sent == this.metaint {
            let block = encode_icy_block(&state.title);
            trace!(
                block_len = block.len(),
                title = %state.title,
                "Metadata block armed"
            );
            state.pending = Some(PendingBlock {
                data: block,
                sent: 0,
            });
        }

        Poll::Ready(Ok(()))
    }
}
