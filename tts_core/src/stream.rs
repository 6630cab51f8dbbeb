//! Streaming audio helpers.
//!
//! Audio leaves the core as a lazy stream of byte chunks so that cached
//! entries are never loaded into memory as a whole. The same type is used as
//! the producer side of `CacheStore::publish`.

use std::{io, pin::Pin};

use bytes::Bytes;
use futures_core::Stream;
use tokio::io::AsyncReadExt;

/// Read size used when streaming a stored entry.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

pub type AudioStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// A stream that yields `audio` as a single chunk.
pub fn from_bytes(audio: Bytes) -> AudioStream {
    Box::pin(async_stream::stream! {
        if !audio.is_empty() {
            yield Ok(audio);
        }
    })
}

/// Stream an open file in `READ_CHUNK_SIZE` pieces until EOF.
pub fn read_chunks(mut file: tokio::fs::File) -> AudioStream {
    Box::pin(async_stream::try_stream! {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    })
}

/// Drain a stream into memory.
pub async fn collect(mut stream: AudioStream) -> io::Result<Vec<u8>> {
    use futures_util::StreamExt;

    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
