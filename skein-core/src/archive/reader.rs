//! Archive consumption: parsing and demultiplexing.
//!
//! The reader walks the framing grammar with a two-state machine. At the
//! top level the next item is a header document (an EOF header must be
//! followed by the terminator); after an open header every document is a
//! record belonging to that run until the terminator closes it. The
//! distinction costs nothing on the wire: the terminator's zero size prefix
//! can never begin a valid document.

use std::collections::HashMap;

use crc::Digest;

use crate::archive::codec::{
    peek_document_size, ArchivePrelude, NamespaceHeader, RECORD_CRC, TERMINATOR,
};
use crate::archive::error::ReadError;
use crate::types::Namespace;

/// One framing event read back from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent<'a> {
    /// An open header: a run of records for this namespace follows.
    RunOpened(Namespace),
    /// One whole record belonging to the current run.
    Record(&'a [u8]),
    /// An EOF header: the stream is complete and checksummed.
    StreamClosed {
        /// Namespace of the finished stream.
        namespace: Namespace,
        /// CRC-64 the writer computed over the stream's records.
        crc: u64,
    },
}

/// Everything read back for one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceDump {
    /// The records, in wire order.
    pub records: Vec<Vec<u8>>,
    /// Checksum carried by the namespace's EOF header.
    pub crc: u64,
}

/// Streaming parser over a complete archive held in memory.
pub struct ArchiveReader<'a> {
    input: &'a [u8],
    pos: usize,
    current_run: Option<Namespace>,
    prelude: Option<ArchivePrelude>,
}

impl<'a> ArchiveReader<'a> {
    /// Wrap `input`, consuming the prelude if one is present.
    ///
    /// # Errors
    /// Returns an error if the archive magic is present but the version
    /// document behind it is unreadable.
    pub fn new(input: &'a [u8]) -> Result<Self, ReadError> {
        let mut pos = 0;
        let mut prelude = None;
        if let Some((decoded, consumed)) = ArchivePrelude::decode(input)? {
            prelude = Some(decoded);
            pos = consumed;
        }
        Ok(Self { input, pos, current_run: None, prelude })
    }

    /// The prelude found at the head of the input, if any.
    #[must_use]
    pub fn prelude(&self) -> Option<&ArchivePrelude> {
        self.prelude.as_ref()
    }

    /// Parse the next framing event, or `None` at a clean end of input.
    ///
    /// Run terminators are consumed silently; they only flip the parser
    /// back to expecting headers.
    ///
    /// # Errors
    /// Returns an error on any grammar violation: truncation, a terminator
    /// outside a run, input ending inside a run, an EOF header without its
    /// trailing terminator, or an unwalkable record.
    #[allow(clippy::cast_sign_loss)]
    pub fn next_event(&mut self) -> Result<Option<ReadEvent<'a>>, ReadError> {
        let input: &'a [u8] = self.input;
        loop {
            match self.current_run.clone() {
                None => {
                    if self.pos == input.len() {
                        return Ok(None);
                    }
                    let rest = &input[self.pos..];
                    if rest.len() >= 4 && rest[..4] == TERMINATOR {
                        return Err(ReadError::Malformed {
                            message: "terminator outside a record run".to_string(),
                        });
                    }
                    let size = peek_document_size(rest)?;
                    let header = NamespaceHeader::decode(&rest[..size])?;
                    let namespace = header.namespace().map_err(|err| ReadError::Malformed {
                        message: format!("header carries an invalid namespace: {err}"),
                    })?;
                    self.pos += size;

                    if header.eof {
                        self.expect_terminator()?;
                        return Ok(Some(ReadEvent::StreamClosed {
                            namespace,
                            crc: header.crc as u64,
                        }));
                    }
                    self.current_run = Some(namespace.clone());
                    return Ok(Some(ReadEvent::RunOpened(namespace)));
                }
                Some(namespace) => {
                    if self.pos == input.len() {
                        return Err(ReadError::UnexpectedEof { namespace });
                    }
                    let rest = &input[self.pos..];
                    if rest.len() >= 4 && rest[..4] == TERMINATOR {
                        self.pos += 4;
                        self.current_run = None;
                        continue;
                    }
                    let size = peek_document_size(rest)?;
                    if rest[size - 1] != 0 {
                        return Err(ReadError::Malformed {
                            message: format!("record for {namespace} is not NUL-terminated"),
                        });
                    }
                    self.pos += size;
                    return Ok(Some(ReadEvent::Record(&rest[..size])));
                }
            }
        }
    }

    /// Demultiplex the whole archive back into per-namespace record
    /// sequences, verifying each stream's CRC-64 against its EOF header.
    ///
    /// Verification assumes the conventional one-producer-per-namespace
    /// deployment. A namespace fed by several interleaved producers still
    /// demultiplexes correctly (its records are an unordered multiset
    /// across producers), but its per-producer checksums cannot be
    /// reconstructed from the wire and will not match.
    ///
    /// # Errors
    /// Returns the first grammar violation or checksum mismatch.
    pub fn demux(mut self) -> Result<HashMap<Namespace, NamespaceDump>, ReadError> {
        let mut dumps: HashMap<Namespace, NamespaceDump> = HashMap::new();
        let mut digests: HashMap<Namespace, Digest<'static, u64>> = HashMap::new();
        let mut current: Option<Namespace> = None;

        while let Some(event) = self.next_event()? {
            match event {
                ReadEvent::RunOpened(namespace) => {
                    current = Some(namespace);
                }
                ReadEvent::Record(record) => {
                    let namespace = current.clone().ok_or_else(|| ReadError::Malformed {
                        message: "record outside a run".to_string(),
                    })?;
                    digests
                        .entry(namespace.clone())
                        .or_insert_with(|| RECORD_CRC.digest())
                        .update(record);
                    dumps.entry(namespace).or_default().records.push(record.to_vec());
                }
                ReadEvent::StreamClosed { namespace, crc } => {
                    let actual = digests.remove(&namespace).map_or(0, |d| d.finalize());
                    if actual != crc {
                        return Err(ReadError::ChecksumMismatch {
                            namespace,
                            expected: crc,
                            actual,
                        });
                    }
                    dumps.entry(namespace).or_default().crc = crc;
                }
            }
        }
        Ok(dumps)
    }

    fn expect_terminator(&mut self) -> Result<(), ReadError> {
        let rest = &self.input[self.pos..];
        if rest.len() < 4 {
            return Err(ReadError::Truncated { required: 4, available: rest.len() });
        }
        if rest[..4] != TERMINATOR {
            return Err(ReadError::Malformed {
                message: "EOF header is not followed by the terminator".to_string(),
            });
        }
        self.pos += 4;
        Ok(())
    }
}
