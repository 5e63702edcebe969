//! RAID5 Stripe Codec
//!
//! Encodes blocks into two data halves plus one parity half using the
//! `reed-solomon-erasure` crate with a 2+1 configuration, and rotates the
//! parity across the three devices block by block. Block `n` places parity
//! on device `(2 + n) % 3`, the first data half on the next device and the
//! second data half on the one after that.
//!
//! Every device receives the same number of bytes per block, so all three
//! device files of a split have equal length.

use std::sync::Arc;

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::{instrument, trace};

use crate::domain::ports::{MIN_SHARDS, SHARD_COUNT};
use crate::error::{Error, Result};

/// Default number of bytes per data half.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Role a device plays within one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRole {
    /// First half of the block
    Primary,
    /// Second half of the block (zero padded)
    Secondary,
    /// XOR parity of both halves
    Parity,
}

/// 2+1 stripe codec with rotating parity
#[derive(Clone)]
pub struct StripeCodec {
    /// Reed-Solomon codec instance
    rs: Arc<ReedSolomon>,
    /// Bytes per data half
    block_size: usize,
}

impl std::fmt::Debug for StripeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeCodec")
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl StripeCodec {
    /// Create a codec with the given half-block size.
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidEcConfig(
                "block_size must be greater than 0".to_string(),
            ));
        }

        let rs = ReedSolomon::new(MIN_SHARDS, SHARD_COUNT - MIN_SHARDS).map_err(|e| {
            Error::InvalidEcConfig(format!("Failed to create Reed-Solomon codec: {}", e))
        })?;

        Ok(Self {
            rs: Arc::new(rs),
            block_size,
        })
    }

    /// Bytes per data half.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Input bytes consumed per block.
    pub fn stripe_width(&self) -> usize {
        2 * self.block_size
    }

    /// Device holding the parity of block `block_no`.
    pub fn parity_device(block_no: u64) -> usize {
        ((2 + block_no) % SHARD_COUNT as u64) as usize
    }

    /// Device that plays `role` in block `block_no`.
    pub fn device_for(role: ShardRole, block_no: u64) -> usize {
        let parity = Self::parity_device(block_no);
        match role {
            ShardRole::Primary => (parity + 1) % SHARD_COUNT,
            ShardRole::Secondary => (parity + 2) % SHARD_COUNT,
            ShardRole::Parity => parity,
        }
    }

    /// Bytes written to each device for a block of `block_len` input bytes.
    pub fn shard_len(block_len: usize) -> usize {
        block_len.div_ceil(2)
    }

    /// Lengths of the blocks an input of `original_len` bytes is cut into.
    pub fn block_lengths(&self, original_len: u64) -> impl Iterator<Item = usize> {
        let width = self.stripe_width() as u64;
        let full = original_len / width;
        let rest = (original_len % width) as usize;
        (0..full)
            .map(move |_| width as usize)
            .chain(std::iter::once(rest).filter(|r| *r > 0))
    }

    /// Length of every device file for an input of `original_len` bytes.
    pub fn device_len(&self, original_len: u64) -> u64 {
        self.block_lengths(original_len)
            .map(|len| Self::shard_len(len) as u64)
            .sum()
    }

    /// Encode one block into per-device shards (indexed by device).
    #[instrument(level = "trace", skip(self, data), fields(block_len = data.len()))]
    pub fn encode_block(&self, block_no: u64, data: &[u8]) -> Result<[Vec<u8>; SHARD_COUNT]> {
        if data.is_empty() || data.len() > self.stripe_width() {
            return Err(Error::Codec(format!(
                "block length {} outside 1..={}",
                data.len(),
                self.stripe_width()
            )));
        }

        let half = Self::shard_len(data.len());
        let primary = data[..half].to_vec();
        let mut secondary = data[half..].to_vec();
        secondary.resize(half, 0);

        let mut shards = vec![primary, secondary, vec![0u8; half]];
        self.rs
            .encode(&mut shards)
            .map_err(|e| Error::Codec(format!("Reed-Solomon encoding failed: {}", e)))?;

        let mut by_device: [Vec<u8>; SHARD_COUNT] = Default::default();
        let roles = [ShardRole::Primary, ShardRole::Secondary, ShardRole::Parity];
        for (role, shard) in roles.into_iter().zip(shards) {
            by_device[Self::device_for(role, block_no)] = shard;
        }

        Ok(by_device)
    }

    /// Rebuild one block from the shards of at least two devices.
    ///
    /// `device_shards` is indexed by device; `None` marks a dead device.
    #[instrument(level = "trace", skip(self, device_shards))]
    pub fn decode_block(
        &self,
        block_no: u64,
        device_shards: [Option<Vec<u8>>; SHARD_COUNT],
        block_len: usize,
    ) -> Result<Vec<u8>> {
        let available = device_shards.iter().filter(|s| s.is_some()).count();
        if available < MIN_SHARDS {
            return Err(Error::InsufficientShards {
                available,
                required: MIN_SHARDS,
            });
        }

        let mut device_shards = device_shards;
        let mut shards: Vec<Option<Vec<u8>>> =
            [ShardRole::Primary, ShardRole::Secondary, ShardRole::Parity]
                .into_iter()
                .map(|role| device_shards[Self::device_for(role, block_no)].take())
                .collect();

        if available < SHARD_COUNT {
            self.rs
                .reconstruct_data(&mut shards)
                .map_err(|e| Error::Codec(format!("Reed-Solomon reconstruction failed: {}", e)))?;
            trace!(block_no, available, "Reconstructed block from degraded stripe");
        }

        let mut data = Vec::with_capacity(block_len + 1);
        for shard in shards.iter().take(MIN_SHARDS).flatten() {
            data.extend_from_slice(shard);
        }
        data.truncate(block_len);

        Ok(data)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_invalid_block_size() {
        assert!(matches!(StripeCodec::new(0), Err(Error::InvalidEcConfig(_))));
        assert!(StripeCodec::new(16).is_ok());
    }

    #[test]
    fn test_parity_rotation() {
        assert_eq!(StripeCodec::parity_device(0), 2);
        assert_eq!(StripeCodec::parity_device(1), 0);
        assert_eq!(StripeCodec::parity_device(2), 1);
        assert_eq!(StripeCodec::parity_device(3), 2);

        assert_eq!(StripeCodec::device_for(ShardRole::Primary, 0), 0);
        assert_eq!(StripeCodec::device_for(ShardRole::Secondary, 0), 1);
        assert_eq!(StripeCodec::device_for(ShardRole::Primary, 1), 1);
        assert_eq!(StripeCodec::device_for(ShardRole::Secondary, 1), 2);
    }

    #[test]
    fn test_block_lengths() {
        let codec = StripeCodec::new(4).unwrap();
        let lens: Vec<usize> = codec.block_lengths(19).collect();
        assert_eq!(lens, vec![8, 8, 3]);
        assert_eq!(codec.block_lengths(0).count(), 0);
        assert_eq!(codec.block_lengths(16).collect::<Vec<_>>(), vec![8, 8]);
        assert_eq!(codec.device_len(19), 4 + 4 + 2);
    }

    #[test]
    fn test_parity_is_xor_of_halves() {
        let codec = StripeCodec::new(4).unwrap();
        let shards = codec.encode_block(0, b"abcdefgh").unwrap();

        assert_eq!(shards[0], b"abcd");
        assert_eq!(shards[1], b"efgh");
        let xor: Vec<u8> = b"abcd".iter().zip(b"efgh").map(|(a, b)| a ^ b).collect();
        assert_eq!(shards[2], xor);
    }

    #[test]
    fn test_decode_with_each_device_missing() {
        let codec = StripeCodec::new(8).unwrap();
        let data = b"RAID5 keeps going with one dead disk";
        let block = &data[..16];

        for block_no in 0..3u64 {
            let shards = codec.encode_block(block_no, block).unwrap();
            for dead in 0..SHARD_COUNT {
                let mut devices: [Option<Vec<u8>>; SHARD_COUNT] =
                    shards.clone().map(Some);
                devices[dead] = None;
                let recovered = codec.decode_block(block_no, devices, block.len()).unwrap();
                assert_eq!(recovered, block);
            }
        }
    }

    #[test]
    fn test_decode_odd_length_block() {
        let codec = StripeCodec::new(8).unwrap();
        let block = b"odd";
        let shards = codec.encode_block(4, block).unwrap();
        assert!(shards.iter().all(|s| s.len() == 2));

        let mut devices: [Option<Vec<u8>>; SHARD_COUNT] = shards.map(Some);
        devices[StripeCodec::device_for(ShardRole::Primary, 4)] = None;
        let recovered = codec.decode_block(4, devices, block.len()).unwrap();
        assert_eq!(recovered, block);
    }

    #[test]
    fn test_decode_insufficient_shards() {
        let codec = StripeCodec::new(8).unwrap();
        let devices = [Some(vec![0u8; 4]), None, None];
        let result = codec.decode_block(0, devices, 8);
        assert!(matches!(
            result,
            Err(Error::InsufficientShards {
                available: 1,
                required: 2
            })
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_block() {
        let codec = StripeCodec::new(2).unwrap();
        assert!(codec.encode_block(0, b"12345").is_err());
        assert!(codec.encode_block(0, b"").is_err());
    }
}
