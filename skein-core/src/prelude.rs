//! Convenient re-exports of the types most callers need.

pub use crate::archive::{
    ArchiveReader, ArchiveSink, MuxControl, Multiplexer, NamespaceHeader, StreamHandle,
};
pub use crate::config::ArchiveConfig;
pub use crate::error::{Error, Result};
pub use crate::metadata::CollectionMetadata;
pub use crate::types::Namespace;

pub use bytes::Bytes;
