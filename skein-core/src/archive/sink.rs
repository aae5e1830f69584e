//! Archive output sinks.
//!
//! The multiplexer is generic over any [`AsyncWrite`] sink; this module
//! provides the concrete family the surrounding system uses: a buffered
//! file, standard output for piping, and an in-memory buffer. All three sit
//! behind the same narrow capability set: open (the constructors), write,
//! close (shutdown), and a no-op read that resolves at end-of-file so the
//! sinks slot into generic copy helpers.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, BufWriter, ReadBuf, Stdout};

use crate::archive::error::ArchiveError;
use crate::config::DEFAULT_IO_BUFFER_SIZE;

/// A byte sink an archive is written to.
///
/// Supports ordered append and one final close; the multiplexer owns the
/// sink for its whole run and shuts it down only on clean completion.
#[derive(Debug)]
pub enum ArchiveSink {
    /// Buffered file on disk.
    File(BufWriter<File>),
    /// Standard output, for piping an archive into another process.
    Stdout(Stdout),
    /// In-memory buffer, for tools and tests.
    Buffer(Vec<u8>),
}

impl ArchiveSink {
    /// Create (truncating) an archive file at `path` with the default
    /// write buffer.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::create_with_capacity(path, DEFAULT_IO_BUFFER_SIZE).await
    }

    /// Create an archive file with an explicit write buffer capacity.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub async fn create_with_capacity(
        path: impl AsRef<Path>,
        capacity: usize,
    ) -> Result<Self, ArchiveError> {
        let file = File::create(path).await?;
        Ok(Self::File(BufWriter::with_capacity(capacity, file)))
    }

    /// Sink that writes the archive to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::Stdout(tokio::io::stdout())
    }

    /// Sink that collects the archive in memory.
    #[must_use]
    pub fn buffer() -> Self {
        Self::Buffer(Vec::new())
    }

    /// Consume the sink and return the collected bytes, if this is a
    /// [`Buffer`](Self::Buffer) sink.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Buffer(bytes) => Some(bytes),
            Self::File(_) | Self::Stdout(_) => None,
        }
    }
}

impl AsyncWrite for ArchiveSink {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::File(file) => Pin::new(file).poll_write(cx, buf),
            Self::Stdout(stdout) => Pin::new(stdout).poll_write(cx, buf),
            Self::Buffer(bytes) => {
                bytes.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::File(file) => Pin::new(file).poll_flush(cx),
            Self::Stdout(stdout) => Pin::new(stdout).poll_flush(cx),
            Self::Buffer(_) => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::File(file) => Pin::new(file).poll_shutdown(cx),
            Self::Stdout(stdout) => Pin::new(stdout).poll_shutdown(cx),
            Self::Buffer(_) => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncRead for ArchiveSink {
    /// Archive sinks are write-only; reads resolve immediately at
    /// end-of-file.
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn buffer_sink_collects_bytes() {
        let mut sink = ArchiveSink::buffer();
        sink.write_all(b"abc").await.unwrap();
        sink.write_all(b"def").await.unwrap();
        sink.shutdown().await.unwrap();
        assert_eq!(sink.into_bytes().unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn reads_resolve_at_eof() {
        let mut sink = ArchiveSink::buffer();
        sink.write_all(b"abc").await.unwrap();

        let mut out = [0u8; 8];
        let n = sink.read(&mut out).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn file_sink_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.archive");

        let mut sink = ArchiveSink::create(&path).await.unwrap();
        sink.write_all(b"payload").await.unwrap();
        sink.shutdown().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
    }
}
