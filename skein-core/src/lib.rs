//! # Skein Core
//!
//! Streaming archive engine: many concurrent producers' record streams are
//! interleaved by a single-writer multiplexer into one serial, checksummed
//! archive.
//!
//! The crate provides:
//! - The [`archive::Multiplexer`] event loop and producer-facing
//!   [`archive::StreamHandle`]s with a synchronous backpressure handshake
//! - The wire codec for namespace headers, run terminators, and the
//!   archive prelude
//! - The [`archive::ArchiveReader`] that walks an archive back into
//!   per-namespace record streams and verifies their checksums
//! - Archive sinks for files, standard output, and memory
//!
//! ## Usage
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> skein_core::Result<()> {
//! use skein_core::archive::{ArchiveSink, Multiplexer};
//! use skein_core::Namespace;
//!
//! let (mux, control) = Multiplexer::new(ArchiveSink::buffer());
//! let done = tokio::spawn(mux.run());
//!
//! let mut stream = control.stream("app.events".parse::<Namespace>()?);
//! stream.open().await?;
//! // One length-prefixed, NUL-terminated record.
//! stream.write(&[6, 0, 0, 0, 42, 0]).await?;
//! stream.close().await?;
//!
//! drop(control);
//! let _sink = done.await.expect("multiplexer task")?;
//! # Ok(()) }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod archive;
pub mod config;
pub mod error;
pub mod metadata;
pub mod prelude;
pub mod types;

pub use error::{Error, Result};
pub use types::Namespace;
