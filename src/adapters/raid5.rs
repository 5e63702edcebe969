//! RAID5 Codec Adapter
//!
//! Implements the `ErasureCodec` port on top of [`StripeCodec`], streaming
//! the staged file block by block into three device files plus a manifest.
//! Runs synchronously; the engine calls it from a blocking thread.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::domain::ports::{ContentHash, ErasureCodec, ShardIndex, MIN_SHARDS, SHARD_COUNT};
use crate::ec::manifest::{hex_digest, keyed_hasher, ShardManifest, MANIFEST_LEN, MANIFEST_VERSION};
use crate::ec::stripe::{StripeCodec, DEFAULT_BLOCK_SIZE};
use crate::error::{Error, Result};

/// Buffer size for staged file streams.
const IO_BUFFER: usize = 64 * 1024;

/// RAID5 erasure codec writing `{hash}.0/.1/.2` and `{hash}.m`.
#[derive(Debug, Clone)]
pub struct Raid5Codec {
    stripe: StripeCodec,
}

impl Raid5Codec {
    /// Create a codec with the given half-block size.
    pub fn new(block_size: usize) -> Result<Self> {
        Ok(Self {
            stripe: StripeCodec::new(block_size)?,
        })
    }

    /// Codec with the default 1 KiB half-block.
    pub fn with_default_block_size() -> Result<Self> {
        Self::new(DEFAULT_BLOCK_SIZE)
    }

    /// Half-block size used when splitting.
    pub fn block_size(&self) -> usize {
        self.stripe.block_size()
    }

    fn device_path(dir: &Path, hash: &ContentHash, device: usize) -> Result<PathBuf> {
        Ok(dir.join(hash.shard_file_name(ShardIndex::new(device)?)))
    }

    /// Hash a device file and report whether it matches the manifest.
    fn device_is_intact(path: &Path, expected_hash: &str, expected_len: u64) -> Result<bool> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() != expected_len {
            return Ok(false);
        }

        let mut hasher = Sha256::new();
        let mut reader = BufReader::with_capacity(IO_BUFFER, file);
        io::copy(&mut reader, &mut HashWriter(&mut hasher))?;
        Ok(hex_digest(hasher) == expected_hash)
    }

    fn merge_into(
        &self,
        input_dir: &Path,
        hash: &ContentHash,
        output: &Path,
        passphrase: &str,
    ) -> Result<()> {
        let manifest_path = input_dir.join(hash.metadata_file_name());
        let manifest = ShardManifest::read_from(&manifest_path).map_err(|e| match e {
            Error::Io(io) if io.kind() == io::ErrorKind::NotFound => {
                Error::Codec(format!("metadata shard {} missing", manifest_path.display()))
            }
            other => other,
        })?;

        // Shards are decoded with the block size recorded at split time.
        let stripe = StripeCodec::new(manifest.block_size as usize)?;
        let device_len = stripe.device_len(manifest.original_len);

        let mut readers: [Option<BufReader<File>>; SHARD_COUNT] = Default::default();
        for (device, reader) in readers.iter_mut().enumerate() {
            let path = Self::device_path(input_dir, hash, device)?;
            if Self::device_is_intact(&path, &manifest.device_hashes[device], device_len)? {
                *reader = Some(BufReader::with_capacity(IO_BUFFER, File::open(&path)?));
            } else {
                warn!(device, hash = %hash, "Device shard missing or damaged, treating as dead");
            }
        }

        let available = readers.iter().filter(|r| r.is_some()).count();
        if available < MIN_SHARDS {
            return Err(Error::InsufficientShards {
                available,
                required: MIN_SHARDS,
            });
        }

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::with_capacity(IO_BUFFER, File::create(output)?);
        let mut hasher = keyed_hasher(passphrase);

        for (block_no, block_len) in stripe.block_lengths(manifest.original_len).enumerate() {
            let shard_len = StripeCodec::shard_len(block_len);
            let mut shards: [Option<Vec<u8>>; SHARD_COUNT] = Default::default();
            for (device, reader) in readers.iter_mut().enumerate() {
                if let Some(reader) = reader {
                    let mut shard = vec![0u8; shard_len];
                    reader.read_exact(&mut shard)?;
                    shards[device] = Some(shard);
                }
            }

            let block = stripe.decode_block(block_no as u64, shards, block_len)?;
            hasher.update(&block);
            writer.write_all(&block)?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;

        if hex_digest(hasher) != manifest.input_hash {
            return Err(Error::Codec(
                "merged output does not match the recorded input hash (wrong passphrase?)"
                    .to_string(),
            ));
        }

        debug!(
            hash = %hash,
            bytes = manifest.original_len,
            devices = available,
            "Merged file"
        );
        Ok(())
    }
}

impl ErasureCodec for Raid5Codec {
    #[instrument(skip(self, passphrase), fields(input = %input.display()))]
    fn split(&self, input: &Path, output_dir: &Path, passphrase: &str) -> Result<ContentHash> {
        fs::create_dir_all(output_dir)?;

        // The input path names the output files; the content hash only goes
        // into the manifest. Equal content under two paths never shares shards.
        let hash = storage_key(input, passphrase);
        let mut input_hasher = keyed_hasher(passphrase);
        let original_len = {
            let mut reader = BufReader::with_capacity(IO_BUFFER, File::open(input)?);
            io::copy(&mut reader, &mut HashWriter(&mut input_hasher))?
        };
        let input_hash = hex_digest(input_hasher);

        let mut writers = Vec::with_capacity(SHARD_COUNT);
        for device in 0..SHARD_COUNT {
            let path = Self::device_path(output_dir, &hash, device)?;
            writers.push(BufWriter::with_capacity(IO_BUFFER, File::create(path)?));
        }
        let mut device_hashers: [Sha256; SHARD_COUNT] = Default::default();

        let mut reader = BufReader::with_capacity(IO_BUFFER, File::open(input)?);
        let mut block = vec![0u8; self.stripe.stripe_width()];
        let mut block_no = 0u64;
        let mut written = 0u64;
        loop {
            let len = read_full(&mut reader, &mut block)?;
            if len == 0 {
                break;
            }
            let shards = self.stripe.encode_block(block_no, &block[..len])?;
            for (device, shard) in shards.iter().enumerate() {
                writers[device].write_all(shard)?;
                device_hashers[device].update(shard);
            }
            written += len as u64;
            block_no += 1;
        }

        if written != original_len {
            return Err(Error::Codec(format!(
                "input changed during split: hashed {} bytes, split {}",
                original_len, written
            )));
        }

        for writer in &mut writers {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        let manifest = ShardManifest {
            version: MANIFEST_VERSION,
            block_size: self.stripe.block_size() as u32,
            original_len,
            device_hashes: device_hashers.map(hex_digest),
            input_hash,
        };
        manifest.write_to(&output_dir.join(hash.metadata_file_name()))?;

        debug!(hash = %hash, bytes = original_len, blocks = block_no, "Split file");
        Ok(hash)
    }

    #[instrument(skip(self, passphrase), fields(hash = %hash, output = %output.display()))]
    fn merge(
        &self,
        input_dir: &Path,
        hash: &ContentHash,
        output: &Path,
        passphrase: &str,
    ) -> Result<()> {
        let result = self.merge_into(input_dir, hash, output, passphrase);
        if result.is_err() {
            if let Err(e) = fs::remove_file(output) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove partial merge output {}: {}", output.display(), e);
                }
            }
        }
        result
    }

    fn metadata_size(&self) -> usize {
        MANIFEST_LEN
    }
}

/// Storage key of the shards split from `input`: keyed SHA-256 of the path.
fn storage_key(input: &Path, passphrase: &str) -> ContentHash {
    let mut hasher = keyed_hasher(passphrase);
    hasher.update(b"path:");
    hasher.update(input.as_os_str().as_encoded_bytes());
    ContentHash::new(hex_digest(hasher))
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// `io::Write` sink feeding a SHA-256 hasher.
struct HashWriter<'a>(&'a mut Sha256);

impl Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
