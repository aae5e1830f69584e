//! Producer-side stream handles.
//!
//! A [`StreamHandle`] is what a producer task writes records into. It
//! accumulates records up to the configured maximum record size, then ships
//! the whole buffer to the multiplexer over a synchronous handshake: send
//! the buffer, wait for the written-byte acknowledgement. The handshake is
//! the only backpressure mechanism, and it also guarantees the buffer is
//! never touched by both sides at once.

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::trace;

use crate::archive::codec::MIN_DOCUMENT_SIZE;
use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::mux::Registration;
use crate::types::Namespace;

/// Writable handle for one logical dump stream.
///
/// Lifecycle: [`open`](Self::open) registers the stream with the
/// multiplexer, any number of [`write`](Self::write) calls deliver whole
/// records, [`close`](Self::close) flushes the residue and deregisters.
/// Records are never split across shipments: any record the surrounding
/// system is allowed to produce fits the accumulation buffer.
#[derive(Debug)]
pub struct StreamHandle {
    namespace: Namespace,
    capacity: usize,
    control: Option<mpsc::Sender<Registration>>,
    data: Option<mpsc::Sender<bytes::Bytes>>,
    ack: Option<mpsc::Receiver<usize>>,
    buf: BytesMut,
    closed: bool,
}

impl StreamHandle {
    pub(crate) fn new(
        namespace: Namespace,
        control: mpsc::Sender<Registration>,
        capacity: usize,
    ) -> Self {
        Self {
            namespace,
            capacity,
            control: Some(control),
            data: None,
            ack: None,
            buf: BytesMut::new(),
            closed: false,
        }
    }

    /// The namespace this stream writes to.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Whether the handle is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.data.is_some()
    }

    /// Register the stream with the multiplexer.
    ///
    /// Allocates the handshake channel pair and the accumulation buffer,
    /// then publishes the registration on the control channel; blocks only
    /// until the multiplexer accepts it. No framing is emitted yet: the
    /// stream's open header appears in the archive when its first shipment
    /// arrives.
    ///
    /// # Errors
    /// `AlreadyOpen` on a second call, `Closed` after [`close`](Self::close),
    /// `Handshake` if the multiplexer is gone.
    pub async fn open(&mut self) -> ArchiveResult<()> {
        if self.closed {
            return Err(ArchiveError::Closed { namespace: self.namespace.clone() });
        }
        if self.data.is_some() {
            return Err(ArchiveError::AlreadyOpen { namespace: self.namespace.clone() });
        }
        let control = match &self.control {
            Some(control) => control.clone(),
            None => {
                return Err(ArchiveError::AlreadyOpen { namespace: self.namespace.clone() })
            }
        };

        let (data_tx, data_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        self.buf = BytesMut::with_capacity(self.capacity);

        let registration = Registration {
            namespace: self.namespace.clone(),
            data: data_rx,
            ack: ack_tx,
        };
        control.send(registration).await.map_err(|_| ArchiveError::Handshake {
            message: "control channel closed before registration was accepted".to_string(),
        })?;

        // The control clone is only needed for registration; dropping it here
        // lets the control channel close once the owning `MuxControl` goes.
        self.control = None;
        self.data = Some(data_tx);
        self.ack = Some(ack_rx);
        trace!(namespace = %self.namespace, "stream opened");
        Ok(())
    }

    /// Deliver one or more concatenated self-framed records.
    ///
    /// The first four bytes must be the little-endian size of the first
    /// record, the input must be at least that long, and the record must end
    /// in a NUL byte. If appending would overflow the accumulation buffer
    /// the current contents are shipped first, so the returned count is
    /// always the full input length.
    ///
    /// # Errors
    /// `NotOpen`/`Closed` for lifecycle misuse, `ShortWrite` if the
    /// multiplexer acknowledged fewer bytes than were shipped, `Handshake`
    /// if the multiplexer vanished mid-flush.
    ///
    /// # Panics
    /// Structural violations of the record framing are upstream data-plane
    /// corruption and unrecoverable.
    pub async fn write(&mut self, record: &[u8]) -> ArchiveResult<usize> {
        if self.closed {
            return Err(ArchiveError::Closed { namespace: self.namespace.clone() });
        }
        if self.data.is_none() {
            return Err(ArchiveError::NotOpen { namespace: self.namespace.clone() });
        }

        assert!(
            record.len() >= 4,
            "corrupt record for {}: {} bytes is too short for a size prefix",
            self.namespace,
            record.len()
        );
        let declared = u32::from_le_bytes([record[0], record[1], record[2], record[3]]) as usize;
        assert!(
            declared >= MIN_DOCUMENT_SIZE,
            "corrupt record for {}: declared size {declared} is below the document minimum",
            self.namespace
        );
        assert!(
            record.len() >= declared,
            "corrupt record for {}: declared size {declared} exceeds the {} bytes provided",
            self.namespace,
            record.len()
        );
        assert!(
            record[declared - 1] == 0,
            "corrupt record for {}: record is not NUL-terminated",
            self.namespace
        );

        if !self.buf.is_empty() && self.buf.len() + record.len() > self.capacity {
            self.flush().await?;
        }
        self.buf.extend_from_slice(record);
        Ok(record.len())
    }

    /// Flush the residue and deregister the stream.
    ///
    /// The handshake channels are torn down even when the final flush
    /// fails; the flush error is returned, and a caller can only tell
    /// "closed clean" from "closed after a short write" by that return
    /// value. The multiplexer observes the closure and frames the stream's
    /// EOF header. A stream that never shipped anything gets no open
    /// header, only the EOF header carrying its (empty) checksum.
    ///
    /// # Errors
    /// `Closed` on a second call, `NotOpen` before [`open`](Self::open);
    /// otherwise whatever the final flush reported.
    pub async fn close(&mut self) -> ArchiveResult<()> {
        if self.closed {
            return Err(ArchiveError::Closed { namespace: self.namespace.clone() });
        }
        if self.data.is_none() {
            return Err(ArchiveError::NotOpen { namespace: self.namespace.clone() });
        }

        let result = if self.buf.is_empty() { Ok(()) } else { self.flush().await };

        self.data = None;
        self.ack = None;
        self.closed = true;
        trace!(namespace = %self.namespace, "stream closed");
        result
    }

    /// Streams are write-only; reads resolve immediately at end-of-file so
    /// the handle slots into generic copy helpers.
    ///
    /// # Errors
    /// None; always returns `Ok(0)`.
    pub fn read(&mut self, _buf: &mut [u8]) -> ArchiveResult<usize> {
        Ok(0)
    }

    /// Ship the accumulation buffer and wait for the acknowledgement.
    async fn flush(&mut self) -> ArchiveResult<()> {
        let data = self.data.as_ref().ok_or_else(|| ArchiveError::NotOpen {
            namespace: self.namespace.clone(),
        })?;
        let ack = self.ack.as_mut().ok_or_else(|| ArchiveError::NotOpen {
            namespace: self.namespace.clone(),
        })?;

        let payload = self.buf.split().freeze();
        let expected = payload.len();
        data.send(payload).await.map_err(|_| ArchiveError::Handshake {
            message: "multiplexer dropped the data channel".to_string(),
        })?;
        let written = ack.recv().await.ok_or_else(|| ArchiveError::Handshake {
            message: "acknowledgement channel closed mid-handshake".to_string(),
        })?;
        if written != expected {
            return Err(ArchiveError::ShortWrite { written, expected });
        }

        // The shipped half of the buffer is gone; restore full capacity for
        // the next accumulation run.
        self.buf.reserve(self.capacity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Multiplexer;
    use crate::archive::sink::ArchiveSink;

    fn framed_record(body_len: usize, fill: u8) -> Vec<u8> {
        let total = 4 + body_len + 1;
        let mut record = Vec::with_capacity(total);
        record.extend_from_slice(&(total as u32).to_le_bytes());
        record.extend(std::iter::repeat(fill).take(body_len));
        record.push(0);
        record
    }

    #[tokio::test]
    async fn lifecycle_errors() {
        let (mux, control) = Multiplexer::new(ArchiveSink::buffer());
        let task = tokio::spawn(mux.run());

        let ns = Namespace::new("app", "events").unwrap();
        let mut stream = control.stream(ns.clone());

        // Use before open.
        assert!(matches!(
            stream.write(&framed_record(1, 0xaa)).await,
            Err(ArchiveError::NotOpen { .. })
        ));
        assert!(matches!(stream.close().await, Err(ArchiveError::NotOpen { .. })));

        stream.open().await.unwrap();
        assert!(stream.is_open());
        assert!(matches!(stream.open().await, Err(ArchiveError::AlreadyOpen { .. })));

        stream.close().await.unwrap();
        assert!(!stream.is_open());
        assert!(matches!(stream.close().await, Err(ArchiveError::Closed { .. })));
        assert!(matches!(stream.open().await, Err(ArchiveError::Closed { .. })));

        drop(control);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn read_is_a_noop() {
        let (_mux, control) = Multiplexer::new(ArchiveSink::buffer());
        let mut stream = control.stream(Namespace::new("app", "events").unwrap());
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[tokio::test]
    #[should_panic(expected = "corrupt record")]
    async fn oversized_declared_length_panics() {
        let (mux, control) = Multiplexer::new(ArchiveSink::buffer());
        let _task = tokio::spawn(mux.run());

        let mut stream = control.stream(Namespace::new("app", "events").unwrap());
        stream.open().await.unwrap();

        // Declares 64 bytes but provides 6.
        let bogus = [64u8, 0, 0, 0, 1, 0];
        let _ = stream.write(&bogus).await;
    }

    #[tokio::test]
    #[should_panic(expected = "not NUL-terminated")]
    async fn missing_terminator_panics() {
        let (mux, control) = Multiplexer::new(ArchiveSink::buffer());
        let _task = tokio::spawn(mux.run());

        let mut stream = control.stream(Namespace::new("app", "events").unwrap());
        stream.open().await.unwrap();

        let mut bogus = framed_record(2, 0xbb);
        let last = bogus.len() - 1;
        bogus[last] = 0xff;
        let _ = stream.write(&bogus).await;
    }
}
