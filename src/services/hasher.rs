//! SHA-256 content hashing.
//!
//! Every entry point feeds the same incremental hasher, so an in-memory
//! buffer, a request stream and a staged file with the same bytes produce
//! the same [`Digest`]. Dedup relies on that equality.

use crate::services::error::{DriveError, DriveResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest as _, Sha256};
use std::{fmt, io, path::Path, str::FromStr};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Read size used when hashing files from disk.
const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// A SHA-256 content fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Digest(bytes))
    }
}

/// Hash a byte slice already held in memory.
pub fn digest_bytes(data: &[u8]) -> Digest {
    Digest(Sha256::digest(data).into())
}

/// Hash a stream of chunks, consuming it to the end.
///
/// Any chunk error aborts hashing with `HashComputation`.
pub async fn digest_stream<S>(stream: S) -> DriveResult<Digest>
where
    S: Stream<Item = io::Result<Bytes>>,
{
    let mut hasher = Sha256::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(DriveError::HashComputation)?;
        hasher.update(&chunk);
    }
    Ok(Digest(hasher.finalize().into()))
}

/// Hash a file on disk without loading it whole.
pub async fn digest_file(path: &Path) -> DriveResult<Digest> {
    let file = File::open(path)
        .await
        .map_err(DriveError::HashComputation)?;
    digest_stream(ReaderStream::with_capacity(file, FILE_CHUNK_SIZE)).await
}
