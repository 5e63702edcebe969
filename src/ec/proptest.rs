//! Property-Based Tests for Erasure Coding
//!
//! Uses proptest to verify the stripe codec and the RAID5 file codec
//! across a wide range of inputs.
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: encode(block) → decode(all devices) = block
//! 2. **Fault Tolerance**: Any single device may be lost
//! 3. **Balanced Devices**: Every device receives the same number of bytes
//! 4. **File Roundtrip**: split(file) → merge(any two devices) = file

#![cfg(test)]

use std::fs;

use proptest::prelude::*;
use tempfile::TempDir;

use super::stripe::StripeCodec;
use crate::adapters::Raid5Codec;
use crate::domain::ports::{ErasureCodec, SHARD_COUNT};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for half-block sizes, kept small so files span many blocks.
fn block_size_strategy() -> impl Strategy<Value = usize> {
    1usize..=64
}

/// Strategy for generating small test data for faster tests.
fn small_data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2000)
}

/// Strategy for which device to lose (`SHARD_COUNT` means none).
fn dead_device_strategy() -> impl Strategy<Value = usize> {
    0usize..=SHARD_COUNT
}

// =============================================================================
// Stripe Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: a block survives the loss of any one device.
    #[test]
    fn prop_block_survives_one_dead_device(
        block_size in block_size_strategy(),
        block_no in 0u64..32,
        seed in prop::collection::vec(any::<u8>(), 1..128),
        dead in dead_device_strategy(),
    ) {
        let codec = StripeCodec::new(block_size)?;
        let len = seed.len().min(codec.stripe_width());
        let block = &seed[..len];

        let shards = codec.encode_block(block_no, block)?;
        let mut devices = shards.map(Some);
        if dead < SHARD_COUNT {
            devices[dead] = None;
        }

        let recovered = codec.decode_block(block_no, devices, len)?;
        prop_assert_eq!(recovered, block);
    }

    /// Property: all devices get the same number of bytes per block.
    #[test]
    fn prop_devices_are_balanced(
        block_size in block_size_strategy(),
        block_no in 0u64..32,
        seed in prop::collection::vec(any::<u8>(), 1..128),
    ) {
        let codec = StripeCodec::new(block_size)?;
        let len = seed.len().min(codec.stripe_width());

        let shards = codec.encode_block(block_no, &seed[..len])?;
        for shard in &shards {
            prop_assert_eq!(shard.len(), StripeCodec::shard_len(len));
        }
    }

    /// Property: the block lengths of a file sum to the file length.
    #[test]
    fn prop_block_lengths_cover_input(
        block_size in block_size_strategy(),
        original_len in 0u64..100_000,
    ) {
        let codec = StripeCodec::new(block_size)?;
        let total: u64 = codec.block_lengths(original_len).map(|l| l as u64).sum();
        prop_assert_eq!(total, original_len);
    }
}

// =============================================================================
// File Codec Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: split then merge with any one device removed restores the file.
    #[test]
    fn prop_file_roundtrip_with_dead_device(
        block_size in block_size_strategy(),
        data in small_data_strategy(),
        dead in dead_device_strategy(),
    ) {
        let dir = TempDir::new()?;
        let input = dir.path().join("input.bin");
        fs::write(&input, &data)?;
        let shards = dir.path().join("shards");

        let codec = Raid5Codec::new(block_size)?;
        let hash = codec.split(&input, &shards, "pass")?;
        if dead < SHARD_COUNT {
            fs::remove_file(shards.join(format!("{}.{}", hash, dead)))?;
        }

        let output = dir.path().join("merged.bin");
        codec.merge(&shards, &hash, &output, "pass")?;
        prop_assert_eq!(fs::read(&output)?, data);
    }
}
