//! The single-writer archive multiplexer.
//!
//! One multiplexer task serializes the shipments of every open stream into
//! the sink, framing each contiguous run of records with namespace headers
//! and closing every stream with an EOF header that carries the stream's
//! CRC-64. All framing decisions and all sink writes happen on this one
//! task; producers only ever talk to it through the registration channel
//! and the per-stream handshake.

use std::future::poll_fn;
use std::task::{Context, Poll};

use bytes::Bytes;
use crc::Digest;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::archive::codec::{NamespaceHeader, RECORD_CRC, TERMINATOR};
use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::stream::StreamHandle;
use crate::config::{ArchiveConfig, ConfigError, DEFAULT_MAX_RECORD_SIZE};
use crate::types::Namespace;

/// Everything the multiplexer needs to serve one stream: announced by the
/// producer's `open` on the control channel.
pub(crate) struct Registration {
    pub(crate) namespace: Namespace,
    pub(crate) data: mpsc::Receiver<Bytes>,
    pub(crate) ack: mpsc::Sender<usize>,
}

/// One open stream as the multiplexer sees it. The wait source and the
/// stream's bookkeeping stay one value, so the selection set and the stream
/// set can never drift apart.
struct MuxEntry {
    namespace: Namespace,
    data: mpsc::Receiver<Bytes>,
    ack: mpsc::Sender<usize>,
    digest: Digest<'static, u64>,
}

impl MuxEntry {
    fn new(registration: Registration) -> Self {
        Self {
            namespace: registration.namespace,
            data: registration.data,
            ack: registration.ack,
            digest: RECORD_CRC.digest(),
        }
    }
}

/// What the wait-for-any surfaced on one iteration.
enum Event {
    /// A producer announced itself on the control channel.
    Register(Registration),
    /// The control channel closed; shutdown, clean or not.
    ControlClosed,
    /// A stream shipped a buffer of records.
    Data(usize, Bytes),
    /// A stream closed its data channel.
    Eof(usize),
}

/// Registration-side handle to a running [`Multiplexer`].
///
/// Clonable; hands out [`StreamHandle`]s bound to this multiplexer. The
/// control channel closes, and the multiplexer finishes, once every
/// `MuxControl` clone and every un-opened handle is gone.
#[derive(Debug, Clone)]
pub struct MuxControl {
    tx: mpsc::Sender<Registration>,
    max_record_size: usize,
}

impl MuxControl {
    /// Create a stream handle for `namespace`, not yet opened.
    #[must_use]
    pub fn stream(&self, namespace: Namespace) -> StreamHandle {
        StreamHandle::new(namespace, self.tx.clone(), self.max_record_size)
    }
}

/// Single-writer engine interleaving every registered stream into `sink`.
///
/// Construct with [`new`](Self::new) or [`with_config`](Self::with_config),
/// spawn [`run`](Self::run), register streams through the returned
/// [`MuxControl`], and after every stream is closed drop the control to let
/// the run finish. The join handle of the spawned run carries exactly one
/// completion value: the closed sink on success, the terminal error
/// otherwise (the sink is deliberately left unclosed on error so the caller
/// can inspect what made it to disk).
pub struct Multiplexer<W> {
    sink: W,
    control: mpsc::Receiver<Registration>,
    entries: Vec<MuxEntry>,
    current_namespace: Option<Namespace>,
}

impl<W: AsyncWrite + Unpin> Multiplexer<W> {
    /// Multiplexer with the default configuration.
    #[must_use]
    pub fn new(sink: W) -> (Self, MuxControl) {
        Self::build(sink, DEFAULT_MAX_RECORD_SIZE)
    }

    /// Multiplexer with an explicit configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration fails validation.
    pub fn with_config(sink: W, config: &ArchiveConfig) -> Result<(Self, MuxControl), ConfigError> {
        config.validate()?;
        Ok(Self::build(sink, config.max_record_size))
    }

    fn build(sink: W, max_record_size: usize) -> (Self, MuxControl) {
        let (tx, control) = mpsc::channel(1);
        let mux = Self { sink, control, entries: Vec::new(), current_namespace: None };
        (mux, MuxControl { tx, max_record_size })
    }

    /// Run the multiplexer until the control channel closes.
    ///
    /// # Errors
    /// Any sink failure, short write, encoding failure, broken handshake,
    /// or control closure with streams still open is terminal and becomes
    /// the completion value.
    pub async fn run(mut self) -> ArchiveResult<W> {
        loop {
            match next_event(&mut self.control, &mut self.entries).await {
                Event::Register(registration) => {
                    debug!(namespace = %registration.namespace, "stream registered");
                    self.entries.push(MuxEntry::new(registration));
                }
                Event::ControlClosed => {
                    if !self.entries.is_empty() {
                        return Err(ArchiveError::DanglingStreams { count: self.entries.len() });
                    }
                    self.sink.shutdown().await?;
                    debug!("archive complete");
                    return Ok(self.sink);
                }
                Event::Data(index, bytes) => {
                    self.entries[index].digest.update(&bytes);
                    let written = self.format_body(index, &bytes).await?;
                    if self.entries[index].ack.send(written).await.is_err() {
                        return Err(ArchiveError::Handshake {
                            message: format!(
                                "stream {} dropped its acknowledgement receiver",
                                self.entries[index].namespace
                            ),
                        });
                    }
                    if written != bytes.len() {
                        return Err(ArchiveError::ShortWrite {
                            written,
                            expected: bytes.len(),
                        });
                    }
                }
                Event::Eof(index) => {
                    let entry = self.entries.remove(index);
                    self.format_eof(entry).await?;
                    self.current_namespace = None;
                }
            }
        }
    }

    /// Write one shipped buffer, preceded by run framing when the stream's
    /// namespace differs from the one currently on the wire.
    ///
    /// Returns the count the body write reported. The caller acknowledges
    /// that raw count to the producer before deciding whether it was short,
    /// so both sides observe the same failure.
    async fn format_body(&mut self, index: usize, body: &[u8]) -> ArchiveResult<usize> {
        let namespace = self.entries[index].namespace.clone();
        if self.current_namespace.as_ref() != Some(&namespace) {
            if self.current_namespace.is_some() {
                self.write_frame(&TERMINATOR).await?;
            }
            let header = NamespaceHeader::open(&namespace).encode()?;
            self.write_frame(&header).await?;
            trace!(namespace = %namespace, "run opened");
            self.current_namespace = Some(namespace);
        }
        Ok(self.sink.write(body).await?)
    }

    /// Close a stream on the wire: terminate whatever run is open, then
    /// frame the EOF header carrying the stream's checksum.
    ///
    /// A stream that never shipped a buffer leaves `current_namespace`
    /// empty, so it gets no leading terminator and no open header was ever
    /// written for it; its EOF header still goes out, checksum over zero
    /// bytes included, so consumers see every stream that was opened.
    async fn format_eof(&mut self, entry: MuxEntry) -> ArchiveResult<()> {
        if self.current_namespace.is_some() {
            self.write_frame(&TERMINATOR).await?;
        }
        let crc = entry.digest.finalize();
        let header = NamespaceHeader::eof(&entry.namespace, crc).encode()?;
        self.write_frame(&header).await?;
        self.write_frame(&TERMINATOR).await?;
        debug!(namespace = %entry.namespace, crc, "stream finished");
        Ok(())
    }

    /// Write a framing sequence whole; anything short is terminal.
    async fn write_frame(&mut self, frame: &[u8]) -> ArchiveResult<()> {
        let written = self.sink.write(frame).await?;
        if written != frame.len() {
            return Err(ArchiveError::ShortWrite { written, expected: frame.len() });
        }
        Ok(())
    }
}

/// Wait for the first available event across the control channel and every
/// open stream's data channel.
///
/// Registrations get priority; control closure is only surfaced once no
/// stream event is pending, so an EOF racing the shutdown is never misread
/// as a dangling stream.
async fn next_event(
    control: &mut mpsc::Receiver<Registration>,
    entries: &mut [MuxEntry],
) -> Event {
    poll_fn(|cx| match control.poll_recv(cx) {
        Poll::Ready(Some(registration)) => Poll::Ready(Event::Register(registration)),
        Poll::Ready(None) => match poll_streams(entries, cx) {
            Poll::Pending => Poll::Ready(Event::ControlClosed),
            ready => ready,
        },
        Poll::Pending => poll_streams(entries, cx),
    })
    .await
}

fn poll_streams(entries: &mut [MuxEntry], cx: &mut Context<'_>) -> Poll<Event> {
    for (index, entry) in entries.iter_mut().enumerate() {
        match entry.data.poll_recv(cx) {
            Poll::Ready(Some(bytes)) => return Poll::Ready(Event::Data(index, bytes)),
            Poll::Ready(None) => return Poll::Ready(Event::Eof(index)),
            Poll::Pending => {}
        }
    }
    Poll::Pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::sink::ArchiveSink;

    #[tokio::test]
    async fn empty_archive_completes_clean() {
        let (mux, control) = Multiplexer::new(ArchiveSink::buffer());
        let task = tokio::spawn(mux.run());
        drop(control);

        let sink = task.await.unwrap().unwrap();
        assert!(sink.into_bytes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dangling_stream_is_terminal() {
        let (mux, control) = Multiplexer::new(ArchiveSink::buffer());
        let task = tokio::spawn(mux.run());

        let mut stream = control.stream(Namespace::new("app", "events").unwrap());
        stream.open().await.unwrap();
        drop(control);

        match task.await.unwrap() {
            Err(ArchiveError::DanglingStreams { count }) => assert_eq!(count, 1),
            other => panic!("expected DanglingStreams, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_stream_emits_only_eof_framing() {
        let (mux, control) = Multiplexer::new(ArchiveSink::buffer());
        let task = tokio::spawn(mux.run());

        let ns = Namespace::new("app", "events").unwrap();
        let mut stream = control.stream(ns.clone());
        stream.open().await.unwrap();
        stream.close().await.unwrap();
        drop(control);

        let bytes = task.await.unwrap().unwrap().into_bytes().unwrap();
        let mut expected = NamespaceHeader::eof(&ns, 0).encode().unwrap().to_vec();
        expected.extend_from_slice(&TERMINATOR);
        assert_eq!(bytes, expected);
    }
}
