//! Streaming archive engine.
//!
//! Many concurrent producer streams are interleaved by a single-writer
//! multiplexer into one serial archive. Each contiguous run of records is
//! framed with a namespace header, each stream is closed with an EOF header
//! carrying the CRC-64 of every record it delivered, and runs are separated
//! by a four-zero-byte terminator.
//!
//! ## Wire layout
//!
//! ```text
//! archive    := prelude? item*
//! item       := open-header record* terminator
//!             | eof-header terminator
//! record     := <u32 LE total size> <body> 0x00
//! terminator := 00 00 00 00
//! ```
//!
//! Headers are self-describing documents (see [`codec`]). A consumer that
//! tracks whether it is inside a run can always distinguish the terminator
//! from a document: documents are at least five bytes long, so their size
//! prefix is never zero.
//!
//! ## Ordering
//!
//! Within one producer, records appear in write order. Producers writing
//! the same namespace interleave arbitrarily at run granularity, so such a
//! namespace must be treated as an unordered multiset of records. Records
//! from different namespaces are always attributable thanks to the run
//! framing.

pub mod codec;
pub mod error;
pub mod mux;
pub mod reader;
pub mod sink;
pub mod stream;

pub use codec::{
    ArchivePrelude, NamespaceHeader, ARCHIVE_MAGIC, ARCHIVE_VERSION, MIN_DOCUMENT_SIZE,
    RECORD_CRC, TERMINATOR,
};
pub use error::{ArchiveError, ArchiveResult, ReadError};
pub use mux::{MuxControl, Multiplexer};
pub use reader::{ArchiveReader, NamespaceDump, ReadEvent};
pub use sink::ArchiveSink;
pub use stream::StreamHandle;
