//! Wire codec for archive framing.
//!
//! Namespace headers are self-describing binary documents: a little-endian
//! `i32` total size, a sequence of typed key/value elements, and a trailing
//! NUL. Record runs are closed by [`TERMINATOR`], four zero bytes, which a
//! consumer tracking framing state can always tell apart from a document
//! (documents are at least [`MIN_DOCUMENT_SIZE`] bytes long).

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_64_XZ};

use crate::archive::error::{ArchiveError, ReadError};
use crate::types::Namespace;

/// Four zero bytes closing every record run.
///
/// This is the shape of an empty document length prefix, so no valid
/// document can collide with it.
pub const TERMINATOR: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Smallest possible document: a 4-byte size prefix and the trailing NUL.
pub const MIN_DOCUMENT_SIZE: usize = 5;

/// Magic bytes identifying an archive, written ahead of the version
/// document by [`ArchivePrelude`].
pub const ARCHIVE_MAGIC: [u8; 4] = [0x6d, 0xe2, 0x99, 0x81];

/// Archive format version carried in the prelude.
pub const ARCHIVE_VERSION: &str = "0.1";

/// CRC-64 used for per-stream record checksums: the ECMA-182 polynomial in
/// reflected form with all-ones initial value and xor-out.
pub static RECORD_CRC: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

// Element tags for the document form.
const ELEMENT_STRING: u8 = 0x02;
const ELEMENT_BOOL: u8 = 0x08;
const ELEMENT_I64: u8 = 0x12;

/// Namespace descriptor framed into the archive.
///
/// An open header (`eof == false`) announces the namespace of the record run
/// that follows. An EOF header (`eof == true`) closes a stream and carries
/// the CRC-64 of every record byte that stream delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceHeader {
    /// Database component of the stream's namespace.
    pub database: String,
    /// Collection component of the stream's namespace.
    pub collection: String,
    /// Whether this header closes the stream.
    pub eof: bool,
    /// CRC-64 of the stream's records; only meaningful when `eof` is set.
    pub crc: i64,
}

impl NamespaceHeader {
    /// Header announcing a record run for `namespace`.
    #[must_use]
    pub fn open(namespace: &Namespace) -> Self {
        Self {
            database: namespace.database().to_string(),
            collection: namespace.collection().to_string(),
            eof: false,
            crc: 0,
        }
    }

    /// Header closing the stream for `namespace` with its record checksum.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn eof(namespace: &Namespace, crc: u64) -> Self {
        Self {
            database: namespace.database().to_string(),
            collection: namespace.collection().to_string(),
            eof: true,
            crc: crc as i64,
        }
    }

    /// The namespace this header describes.
    ///
    /// # Errors
    /// Returns an error if the decoded components do not form a valid
    /// namespace.
    pub fn namespace(&self) -> crate::Result<Namespace> {
        Namespace::new(self.database.clone(), self.collection.clone())
    }

    /// Encode the header as a document.
    ///
    /// Field order is fixed (`db`, `c`, `eof`, `crc`) and absent fields are
    /// omitted entirely: an open header carries only `db` and `c`, an EOF
    /// header always carries `eof` and `crc`, `crc == 0` included.
    ///
    /// # Errors
    /// Returns an error if the document would exceed the size prefix range.
    pub fn encode(&self) -> Result<Bytes, ArchiveError> {
        let mut doc = DocumentBuilder::new();
        doc.append_str("db", &self.database);
        doc.append_str("c", &self.collection);
        if self.eof {
            doc.append_bool("eof", true);
            doc.append_i64("crc", self.crc);
        }
        doc.finish()
    }

    /// Decode a header from one complete document slice.
    ///
    /// Extra fields of known element kinds are skipped, so headers written
    /// by newer producers stay readable.
    ///
    /// # Errors
    /// Returns an error if the slice is not one well-formed document or the
    /// mandatory `db`/`c` fields are missing.
    pub fn decode(doc: &[u8]) -> Result<Self, ReadError> {
        let mut database = None;
        let mut collection = None;
        let mut eof = false;
        let mut crc = 0i64;

        let mut parser = DocumentParser::new(doc)?;
        while let Some((key, value)) = parser.next_element()? {
            match (key, value) {
                ("db", Element::Str(s)) => database = Some(s.to_string()),
                ("c", Element::Str(s)) => collection = Some(s.to_string()),
                ("eof", Element::Bool(b)) => eof = b,
                ("crc", Element::I64(v)) => crc = v,
                _ => {} // unknown field of a known kind
            }
        }

        let database = database.ok_or_else(|| ReadError::Malformed {
            message: "header document is missing the `db` field".to_string(),
        })?;
        let collection = collection.ok_or_else(|| ReadError::Malformed {
            message: "header document is missing the `c` field".to_string(),
        })?;
        Ok(Self { database, collection, eof, crc })
    }
}

/// The `magic + version document` preamble a dump writes at the head of the
/// sink before the multiplexer starts. Transparent to the multiplexer
/// itself; consumed, when present, by the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePrelude {
    /// Archive format version.
    pub version: String,
}

impl Default for ArchivePrelude {
    fn default() -> Self {
        Self { version: ARCHIVE_VERSION.to_string() }
    }
}

impl ArchivePrelude {
    /// Encode the magic bytes followed by the version document.
    ///
    /// # Errors
    /// Returns an error if the version document cannot be encoded.
    pub fn encode(&self) -> Result<Bytes, ArchiveError> {
        let mut doc = DocumentBuilder::new();
        doc.append_str("version", &self.version);
        let doc = doc.finish()?;

        let mut out = BytesMut::with_capacity(ARCHIVE_MAGIC.len() + doc.len());
        out.put_slice(&ARCHIVE_MAGIC);
        out.put_slice(&doc);
        Ok(out.freeze())
    }

    /// Decode a prelude from the head of `input`, returning it together
    /// with the number of bytes it occupied. Returns `Ok(None)` if the
    /// input does not start with the archive magic.
    ///
    /// # Errors
    /// Returns an error if the magic is present but the version document is
    /// truncated or malformed.
    pub fn decode(input: &[u8]) -> Result<Option<(Self, usize)>, ReadError> {
        if input.len() < ARCHIVE_MAGIC.len() || input[..ARCHIVE_MAGIC.len()] != ARCHIVE_MAGIC {
            return Ok(None);
        }
        let rest = &input[ARCHIVE_MAGIC.len()..];
        let doc_len = peek_document_size(rest)?;
        let mut version = None;

        let mut parser = DocumentParser::new(&rest[..doc_len])?;
        while let Some((key, value)) = parser.next_element()? {
            if let ("version", Element::Str(s)) = (key, value) {
                version = Some(s.to_string());
            }
        }

        let version = version.ok_or_else(|| ReadError::Malformed {
            message: "prelude document is missing the `version` field".to_string(),
        })?;
        Ok(Some((Self { version }, ARCHIVE_MAGIC.len() + doc_len)))
    }
}

/// Read and bounds-check the size prefix of the document at the head of
/// `input`.
///
/// # Errors
/// Returns an error if fewer than four bytes remain, the declared size is
/// below the document minimum, or the input is shorter than declared.
pub(crate) fn peek_document_size(input: &[u8]) -> Result<usize, ReadError> {
    if input.len() < 4 {
        return Err(ReadError::Truncated { required: 4, available: input.len() });
    }
    let size = u32::from_le_bytes([input[0], input[1], input[2], input[3]]) as usize;
    if size < MIN_DOCUMENT_SIZE {
        return Err(ReadError::Malformed {
            message: format!("document size {size} is below the minimum of {MIN_DOCUMENT_SIZE}"),
        });
    }
    if input.len() < size {
        return Err(ReadError::Truncated { required: size, available: input.len() });
    }
    Ok(size)
}

/// Incremental document builder with the fixed element layout headers use.
#[derive(Debug)]
pub(crate) struct DocumentBuilder {
    buf: BytesMut,
}

impl DocumentBuilder {
    pub(crate) fn new() -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u32_le(0); // size prefix, patched in finish()
        Self { buf }
    }

    pub(crate) fn append_str(&mut self, key: &str, value: &str) {
        self.buf.put_u8(ELEMENT_STRING);
        self.put_key(key);
        self.buf.put_u32_le(value.len() as u32 + 1);
        self.buf.put_slice(value.as_bytes());
        self.buf.put_u8(0);
    }

    pub(crate) fn append_bool(&mut self, key: &str, value: bool) {
        self.buf.put_u8(ELEMENT_BOOL);
        self.put_key(key);
        self.buf.put_u8(u8::from(value));
    }

    pub(crate) fn append_i64(&mut self, key: &str, value: i64) {
        self.buf.put_u8(ELEMENT_I64);
        self.put_key(key);
        self.buf.put_i64_le(value);
    }

    pub(crate) fn finish(mut self) -> Result<Bytes, ArchiveError> {
        self.buf.put_u8(0);
        let total = self.buf.len();
        if total > i32::MAX as usize {
            return Err(ArchiveError::Encode {
                message: format!("document size {total} exceeds the size prefix range"),
            });
        }
        self.buf[..4].copy_from_slice(&(total as u32).to_le_bytes());
        Ok(self.buf.freeze())
    }

    fn put_key(&mut self, key: &str) {
        debug_assert!(!key.contains('\0'));
        self.buf.put_slice(key.as_bytes());
        self.buf.put_u8(0);
    }
}

/// One decoded document element.
enum Element<'a> {
    Str(&'a str),
    Bool(bool),
    I64(i64),
}

/// Walks the elements of one complete document slice.
struct DocumentParser<'a> {
    doc: &'a [u8],
    pos: usize,
}

impl<'a> DocumentParser<'a> {
    fn new(doc: &'a [u8]) -> Result<Self, ReadError> {
        let size = peek_document_size(doc)?;
        if size != doc.len() {
            return Err(ReadError::Malformed {
                message: format!(
                    "document declares {size} bytes but the slice holds {}",
                    doc.len()
                ),
            });
        }
        if doc[doc.len() - 1] != 0 {
            return Err(ReadError::Malformed {
                message: "document is missing its trailing NUL".to_string(),
            });
        }
        Ok(Self { doc, pos: 4 })
    }

    fn next_element(&mut self) -> Result<Option<(&'a str, Element<'a>)>, ReadError> {
        let tag = self.take_u8()?;
        if tag == 0 {
            if self.pos != self.doc.len() {
                return Err(ReadError::Malformed {
                    message: "bytes trailing the document's NUL terminator".to_string(),
                });
            }
            return Ok(None);
        }

        let key = self.take_cstring()?;
        let value = match tag {
            ELEMENT_STRING => {
                let declared = u32::from_le_bytes(self.take_array()?) as usize;
                if declared == 0 {
                    return Err(ReadError::Malformed {
                        message: format!("string field `{key}` declares zero length"),
                    });
                }
                let raw = self.take_bytes(declared)?;
                if raw[declared - 1] != 0 {
                    return Err(ReadError::Malformed {
                        message: format!("string field `{key}` is missing its NUL"),
                    });
                }
                let s = std::str::from_utf8(&raw[..declared - 1]).map_err(|_| {
                    ReadError::Malformed {
                        message: format!("string field `{key}` is not UTF-8"),
                    }
                })?;
                Element::Str(s)
            }
            ELEMENT_BOOL => match self.take_u8()? {
                0 => Element::Bool(false),
                1 => Element::Bool(true),
                other => {
                    return Err(ReadError::Malformed {
                        message: format!("boolean field `{key}` has value {other:#04x}"),
                    })
                }
            },
            ELEMENT_I64 => Element::I64(i64::from_le_bytes(self.take_array()?)),
            other => {
                return Err(ReadError::Malformed {
                    message: format!("unknown element tag {other:#04x}"),
                })
            }
        };
        Ok(Some((key, value)))
    }

    fn take_u8(&mut self) -> Result<u8, ReadError> {
        let [b] = self.take_array()?;
        Ok(b)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ReadError> {
        let raw = self.take_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }

    fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        let available = self.doc.len() - self.pos;
        if available < n {
            return Err(ReadError::Truncated { required: n, available });
        }
        let out = &self.doc[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_cstring(&mut self) -> Result<&'a str, ReadError> {
        let rest = &self.doc[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| ReadError::Malformed {
            message: "unterminated element key".to_string(),
        })?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| ReadError::Malformed {
            message: "element key is not UTF-8".to_string(),
        })?;
        self.pos += nul + 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace() -> Namespace {
        Namespace::new("app", "events").unwrap()
    }

    #[test]
    fn crc_parameters_are_pinned() {
        // CRC-64/XZ check value for the standard "123456789" message.
        assert_eq!(RECORD_CRC.checksum(b"123456789"), 0x995d_c9bb_df19_39fa);
        // An empty message digests to zero.
        assert_eq!(RECORD_CRC.digest().finalize(), 0);
    }

    #[test]
    fn terminator_is_not_a_document() {
        assert!(matches!(
            peek_document_size(&TERMINATOR),
            Err(ReadError::Malformed { .. })
        ));
    }

    #[test]
    fn open_header_layout() {
        let doc = NamespaceHeader::open(&namespace()).encode().unwrap();

        // Size prefix covers the whole document, trailing NUL included.
        let size = u32::from_le_bytes([doc[0], doc[1], doc[2], doc[3]]) as usize;
        assert_eq!(size, doc.len());
        assert_eq!(doc[doc.len() - 1], 0);

        // `db` comes first, then `c`. No other fields.
        assert_eq!(doc[4], 0x02);
        assert_eq!(&doc[5..8], b"db\0");
        let decoded = NamespaceHeader::decode(&doc).unwrap();
        assert_eq!(decoded, NamespaceHeader::open(&namespace()));
        assert!(!decoded.eof);
    }

    #[test]
    fn eof_header_carries_checksum_even_when_zero() {
        let doc = NamespaceHeader::eof(&namespace(), 0).encode().unwrap();
        let decoded = NamespaceHeader::decode(&doc).unwrap();
        assert!(decoded.eof);
        assert_eq!(decoded.crc, 0);

        let doc = NamespaceHeader::eof(&namespace(), u64::MAX).encode().unwrap();
        let decoded = NamespaceHeader::decode(&doc).unwrap();
        assert_eq!(decoded.crc, -1);
    }

    #[test]
    fn eof_field_order_is_db_c_eof_crc() {
        let doc = NamespaceHeader::eof(&namespace(), 7).encode().unwrap();
        let db = doc.windows(3).position(|w| w == b"db\0").unwrap();
        let c = doc.windows(2).position(|w| w == b"c\0").unwrap();
        let eof = doc.windows(4).position(|w| w == b"eof\0").unwrap();
        let crc = doc.windows(4).position(|w| w == b"crc\0").unwrap();
        assert!(db < c && c < eof && eof < crc);
    }

    #[test]
    fn decode_skips_unknown_fields() {
        let mut builder = DocumentBuilder::new();
        builder.append_str("db", "app");
        builder.append_str("note", "ignored");
        builder.append_str("c", "events");
        builder.append_i64("padding", 9);
        let doc = builder.finish().unwrap();

        let decoded = NamespaceHeader::decode(&doc).unwrap();
        assert_eq!(decoded.database, "app");
        assert_eq!(decoded.collection, "events");
    }

    #[test]
    fn decode_rejects_missing_namespace_fields() {
        let mut builder = DocumentBuilder::new();
        builder.append_str("db", "app");
        let doc = builder.finish().unwrap();
        assert!(matches!(
            NamespaceHeader::decode(&doc),
            Err(ReadError::Malformed { .. })
        ));
    }

    #[test]
    fn decode_rejects_truncated_document() {
        let doc = NamespaceHeader::open(&namespace()).encode().unwrap();
        assert!(matches!(
            NamespaceHeader::decode(&doc[..doc.len() - 2]),
            Err(ReadError::Malformed { .. }) | Err(ReadError::Truncated { .. })
        ));
    }

    #[test]
    fn prelude_roundtrip() {
        let encoded = ArchivePrelude::default().encode().unwrap();
        let (prelude, consumed) = ArchivePrelude::decode(&encoded).unwrap().unwrap();
        assert_eq!(prelude.version, ARCHIVE_VERSION);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn prelude_is_optional() {
        let doc = NamespaceHeader::open(&namespace()).encode().unwrap();
        assert!(ArchivePrelude::decode(&doc).unwrap().is_none());
        assert!(ArchivePrelude::decode(&[]).unwrap().is_none());
    }
}
