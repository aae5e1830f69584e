//! End-to-end archive demo.
//!
//! Two producer tasks dump records for different collections through one
//! multiplexer, then the resulting archive is demultiplexed and verified.

use skein_core::archive::{ArchivePrelude, ArchiveReader, ArchiveSink, Multiplexer};
use skein_core::Namespace;
use tokio::io::AsyncWriteExt;

fn framed_record(body: &[u8]) -> Vec<u8> {
    let total = 4 + body.len() + 1;
    let mut record = Vec::with_capacity(total);
    record.extend_from_slice(&(total as u32).to_le_bytes());
    record.extend_from_slice(body);
    record.push(0);
    record
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    // The surrounding system writes the prelude before the multiplexer
    // starts; it is transparent to the engine.
    let mut sink = ArchiveSink::buffer();
    sink.write_all(&ArchivePrelude::default().encode()?).await?;

    let (mux, control) = Multiplexer::new(sink);
    let done = tokio::spawn(mux.run());

    let mut tasks = Vec::new();
    for (namespace, count) in [("shop.orders", 5usize), ("shop.customers", 3)] {
        let mut stream = control.stream(namespace.parse::<Namespace>()?);
        tasks.push(tokio::spawn(async move {
            stream.open().await?;
            for i in 0..count {
                let body = format!("{} record {i}", stream.namespace());
                stream.write(&framed_record(body.as_bytes())).await?;
            }
            stream.close().await
        }));
    }
    for task in tasks {
        task.await??;
    }

    drop(control);
    let sink = done.await??;
    let bytes = sink.into_bytes().expect("buffer sink");
    println!("archive: {} bytes", bytes.len());

    let reader = ArchiveReader::new(&bytes)?;
    println!(
        "prelude version: {}",
        reader.prelude().map_or("(none)", |p| p.version.as_str())
    );
    for (namespace, dump) in reader.demux()? {
        println!(
            "{namespace}: {} records, crc {:#018x}",
            dump.records.len(),
            dump.crc
        );
    }
    Ok(())
}
