//! Archive-specific error types.

use thiserror::Error;

use crate::types::Namespace;

/// Result type alias for archive write-side operations.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// Errors raised while writing an archive.
///
/// Every variant except the stream-lifecycle ones (`AlreadyOpen`, `NotOpen`,
/// `Closed`) is terminal for the multiplexer: it publishes the error as its
/// completion value and stops without closing the sink.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The sink accepted fewer bytes than were offered.
    #[error("short write to archive sink: wrote {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes the sink reported written.
        written: usize,
        /// Bytes offered.
        expected: usize,
    },

    /// The underlying sink failed.
    #[error("archive sink I/O error: {0}")]
    Sink(#[from] std::io::Error),

    /// A header document could not be encoded.
    #[error("header encoding failed: {message}")]
    Encode {
        /// What could not be encoded.
        message: String,
    },

    /// A handshake peer disappeared mid-shipment.
    ///
    /// The data and acknowledgement channels are closed together during an
    /// orderly stream shutdown; seeing one end vanish while the other is
    /// mid-transfer means the peer task died.
    #[error("stream handshake broken: {message}")]
    Handshake {
        /// Which half of the handshake failed.
        message: String,
    },

    /// The control channel closed while data streams were still open.
    #[error("control channel closed with {count} stream(s) still open")]
    DanglingStreams {
        /// Number of streams left open.
        count: usize,
    },

    /// `open` was called on a stream handle that is already open.
    #[error("stream for {namespace} is already open")]
    AlreadyOpen {
        /// The stream's namespace.
        namespace: Namespace,
    },

    /// The stream handle was used before `open`.
    #[error("stream for {namespace} is not open")]
    NotOpen {
        /// The stream's namespace.
        namespace: Namespace,
    },

    /// The stream handle was used after `close`.
    #[error("stream for {namespace} is closed")]
    Closed {
        /// The stream's namespace.
        namespace: Namespace,
    },
}

/// Errors raised while reading an archive back.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The input ended in the middle of a length-prefixed item.
    #[error("archive truncated: needed {required} bytes, {available} available")]
    Truncated {
        /// Bytes the current item requires.
        required: usize,
        /// Bytes left in the input.
        available: usize,
    },

    /// The input violates the archive grammar.
    #[error("malformed archive: {message}")]
    Malformed {
        /// What was violated.
        message: String,
    },

    /// The input ended inside an unterminated record run.
    #[error("input ended inside a record run for {namespace}")]
    UnexpectedEof {
        /// Namespace whose run was cut off.
        namespace: Namespace,
    },

    /// A stream's records do not match the checksum carried by its EOF
    /// header.
    #[error(
        "checksum mismatch for {namespace}: header {expected:#018x}, computed {actual:#018x}"
    )]
    ChecksumMismatch {
        /// Namespace whose records were checksummed.
        namespace: Namespace,
        /// CRC-64 carried by the EOF header.
        expected: u64,
        /// CRC-64 computed over the records read.
        actual: u64,
    },
}
