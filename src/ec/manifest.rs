//! Shard Manifest
//!
//! The metadata shard (`{hash}.m`) written next to the three device files.
//! It is a fixed-size binary record so connectors can validate a fetched
//! copy by length alone:
//!
//! ```text
//! offset  size  field
//! 0       3     magic "CRM"
//! 3       1     version
//! 4       4     block size (u32, big endian)
//! 8       8     original length (u64, big endian)
//! 16      64    SHA-256 hex of device 0
//! 80      64    SHA-256 hex of device 1
//! 144     64    SHA-256 hex of device 2
//! 208     64    SHA-256 hex of the keyed input
//! ```

use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::domain::ports::SHARD_COUNT;
use crate::error::{Error, Result};

/// Manifest format version.
pub const MANIFEST_VERSION: u8 = 1;

const MAGIC: &[u8; 3] = b"CRM";
const HASH_HEX_LEN: usize = 64;

/// Encoded manifest size in bytes.
pub const MANIFEST_LEN: usize = 3 + 1 + 4 + 8 + HASH_HEX_LEN * (SHARD_COUNT + 1);

/// Integrity record for one split file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardManifest {
    pub version: u8,
    pub block_size: u32,
    pub original_len: u64,
    /// SHA-256 hex per device file
    pub device_hashes: [String; SHARD_COUNT],
    /// SHA-256 hex of passphrase || input
    pub input_hash: String,
}

impl ShardManifest {
    /// Serialize to the fixed binary layout.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(MANIFEST_LEN);
        buf.put_slice(MAGIC);
        buf.put_u8(self.version);
        buf.put_u32(self.block_size);
        buf.put_u64(self.original_len);
        for hash in self.device_hashes.iter().chain(std::iter::once(&self.input_hash)) {
            if hash.len() != HASH_HEX_LEN || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::ManifestCorrupt(format!("invalid hash field {:?}", hash)));
            }
            buf.put_slice(hash.as_bytes());
        }
        Ok(buf.freeze())
    }

    /// Parse the fixed binary layout.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != MANIFEST_LEN {
            return Err(Error::ManifestCorrupt(format!(
                "expected {} bytes, got {}",
                MANIFEST_LEN,
                raw.len()
            )));
        }

        let mut buf = raw;
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(Error::ManifestCorrupt("bad magic".to_string()));
        }
        buf.advance(MAGIC.len());

        let version = buf.get_u8();
        if version != MANIFEST_VERSION {
            return Err(Error::ManifestCorrupt(format!(
                "unsupported version {}",
                version
            )));
        }
        let block_size = buf.get_u32();
        let original_len = buf.get_u64();

        let mut read_hash = || -> Result<String> {
            let field = &buf[..HASH_HEX_LEN];
            let hash = std::str::from_utf8(field)
                .map_err(|_| Error::ManifestCorrupt("non-ascii hash field".to_string()))?
                .to_string();
            buf.advance(HASH_HEX_LEN);
            Ok(hash)
        };

        let device_hashes = [read_hash()?, read_hash()?, read_hash()?];
        let input_hash = read_hash()?;

        Ok(Self {
            version,
            block_size,
            original_len,
            device_hashes,
            input_hash,
        })
    }

    /// Read and decode a manifest file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Self::decode(&raw)
    }

    /// Encode and write a manifest file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.encode()?)?;
        Ok(())
    }
}

/// Lower-case hex SHA-256 of a finished hasher.
pub fn hex_digest(hasher: Sha256) -> String {
    format!("{:x}", hasher.finalize())
}

/// Hasher for the keyed input hash, primed with the passphrase.
pub fn keyed_hasher(passphrase: &str) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher
}
