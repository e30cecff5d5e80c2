//! Content fingerprints for sources and flag sets.
//!
//! SHA-256 over file contents is authoritative. The recorded size and
//! modification time only serve as a fast path: when both match the previous
//! record the file is assumed unchanged and is not read again.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Hex SHA-256 of the contents.
    pub hash: String,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime: u64,
}

impl FileFingerprint {
    /// Fingerprint `path`, reusing `previous.hash` when size and mtime are unchanged.
    pub fn compute(path: &Path, previous: Option<&FileFingerprint>) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let size = meta.len();
        let mtime = mtime_nanos(&meta);

        if let Some(prev) = previous
            && prev.size == size
            && prev.mtime == mtime
        {
            return Ok(prev.clone());
        }

        Ok(Self {
            hash: hash_file(path)?,
            size,
            mtime,
        })
    }

    /// The hash decides: a touched file with identical contents is unchanged.
    pub fn same_content(&self, other: &FileFingerprint) -> bool {
        self.hash == other.hash
    }
}

pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

/// Hash an ordered token sequence. Tokens are length-prefixed so that
/// `["-a b"]` and `["-a", "b"]` differ.
pub fn hash_tokens<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for token in tokens {
        let token = token.as_ref();
        hasher.update((token.len() as u64).to_le_bytes());
        hasher.update(token.as_bytes());
    }
    hex(&hasher.finalize())
}

pub fn mtime_nanos(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Modification time of `path`, or `None` when it does not exist.
pub fn path_mtime(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| mtime_nanos(&m))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
