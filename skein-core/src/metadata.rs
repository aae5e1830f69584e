//! Collection metadata sidecar documents.
//!
//! Alongside each collection's record stream a dump writes a small JSON
//! sidecar describing the collection's options and indexes. It is an
//! independent file stream; the archive engine never looks inside it.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Options and index definitions for one dumped collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Creation options of the collection, omitted when there are none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,

    /// Index definitions. Always serialized, as an empty array when there
    /// are none; downstream consumers reject `null` here.
    #[serde(default)]
    pub indexes: Vec<serde_json::Value>,
}

impl CollectionMetadata {
    /// Metadata with no options and no indexes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Write the JSON document to `writer` and flush it.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> crate::Result<()> {
        let json = self.to_json()?;
        writer.write_all(&json).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_metadata_serializes_indexes_as_array() {
        let json = CollectionMetadata::new().to_json().unwrap();
        assert_eq!(json, br#"{"indexes":[]}"#);
    }

    #[test]
    fn options_appear_when_set() {
        let meta = CollectionMetadata {
            options: Some(serde_json::json!({"capped": true, "size": 4096})),
            indexes: vec![serde_json::json!({"key": {"_id": 1}, "name": "_id_"})],
        };
        let json = String::from_utf8(meta.to_json().unwrap()).unwrap();
        assert!(json.contains(r#""capped":true"#));
        assert!(json.contains(r#""name":"_id_""#));
    }

    #[tokio::test]
    async fn writes_to_a_sink() {
        let mut out = Vec::new();
        CollectionMetadata::new().write_to(&mut out).await.unwrap();
        assert_eq!(out, br#"{"indexes":[]}"#);
    }
}
