//! Stream adapters that trace bytes crossing the sandbox boundary.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

/// Reader that logs every chunk read at `trace` level.
#[derive(Debug)]
pub struct LoggingReader<R> {
    label: String,
    inner: R,
}

impl<R> LoggingReader<R> {
    /// Wrap `inner`; `label` identifies the stream in log output.
    pub fn new(label: impl Into<String>, inner: R) -> Self {
        Self {
            label: label.into(),
            inner,
        }
    }

    /// Unwrap the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LoggingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let chunk = buf.filled().get(before..).unwrap_or_default();
            if chunk.is_empty() {
                trace!(stream = %self.label, "eof");
            } else {
                trace!(
                    stream = %self.label,
                    bytes = chunk.len(),
                    data = %String::from_utf8_lossy(chunk),
                    "read"
                );
            }
        }
        poll
    }
}

/// Writer that logs every chunk written at `trace` level.
#[derive(Debug)]
pub struct LoggingWriter<W> {
    label: String,
    inner: W,
}

impl<W> LoggingWriter<W> {
    /// Wrap `inner`; `label` identifies the stream in log output.
    pub fn new(label: impl Into<String>, inner: W) -> Self {
        Self {
            label: label.into(),
            inner,
        }
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for LoggingWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            let written = buf.get(..*n).unwrap_or_default();
            trace!(
                stream = %self.label,
                bytes = *n,
                data = %String::from_utf8_lossy(written),
                "write"
            );
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
