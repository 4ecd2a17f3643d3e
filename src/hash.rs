//! Content digests.
//!
//! Every stored file version is addressed by the BLAKE3 digest of its bytes,
//! rendered as lowercase hex. Dirtiness detection, blob identity and the
//! FileRef index all compare these digests; modification times are never
//! consulted.

use std::fmt::Display;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::{fs, io};

use serde::{Deserialize, Serialize};

/// Byte width of a content digest.
pub const HASH_SIZE: usize = 32;
/// Hex width of a content digest.
pub const HASH_HEX_LEN: usize = 64;

/// BLAKE3 digest of a file version's content.
///
/// Equality of two blobs is equality of their digests. Supports conversion
/// to and from lowercase hex strings and raw byte slices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    /// Digest a byte slice.
    pub fn new(data: &[u8]) -> ContentHash {
        ContentHash(*blake3::hash(data).as_bytes())
    }

    /// Digest a file by streaming it, without loading it whole.
    pub fn from_file(path: &Path) -> io::Result<ContentHash> {
        let mut hasher = blake3::Hasher::new();
        let mut file = fs::File::open(path)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(ContentHash(*hasher.finalize().as_bytes()))
    }

    /// Build from raw bytes of exactly [`HASH_SIZE`] length.
    pub fn from_bytes(bytes: &[u8]) -> Result<ContentHash, String> {
        if bytes.len() != HASH_SIZE {
            return Err(format!(
                "invalid digest length: got {}, expected {HASH_SIZE}",
                bytes.len()
            ));
        }
        let mut h = [0u8; HASH_SIZE];
        h.copy_from_slice(bytes);
        Ok(ContentHash(h))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Parse a 64-character lowercase hex string.
impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_LEN {
            return Err(format!(
                "invalid digest length: got {}, expected {HASH_HEX_LEN}",
                s.len()
            ));
        }
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        ContentHash::from_bytes(&bytes)
    }
}
