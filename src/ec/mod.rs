//! Erasure Coding Module
//!
//! Building blocks of the RAID5 codec shipped with CloudRAID.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Erasure Coding Module                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────────┐            ┌──────────────────────────┐   │
//! │  │   Stripe Codec   │            │     Shard Manifest       │   │
//! │  │ (2+1, rotating)  │            │  ({hash}.m, fixed size)  │   │
//! │  └──────────────────┘            └──────────────────────────┘   │
//! │            │                                  │                  │
//! │            └───────────────┬──────────────────┘                  │
//! │                            │                                     │
//! │                  ┌─────────┴─────────┐                           │
//! │                  │  adapters::Raid5  │                           │
//! │                  │  (ErasureCodec)   │                           │
//! │                  └───────────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **Stripe Codec** (`stripe.rs`): Reed-Solomon 2+1 encoding of one block
//!   into three per-device halves, with parity rotating across devices:
//!   - Encode a block into primary, secondary and parity halves
//!   - Rebuild a block from any two devices
//!
//! - **Shard Manifest** (`manifest.rs`): the metadata shard holding the block
//!   size, original length and integrity hashes used to detect dead devices.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cloudraid::ec::stripe::StripeCodec;
//!
//! let codec = StripeCodec::new(1024)?;
//! let shards = codec.encode_block(0, b"Hello, World!")?;
//!
//! let mut devices = shards.map(Some);
//! devices[1] = None; // lose one device
//! let block = codec.decode_block(0, devices, 13)?;
//! assert_eq!(block, b"Hello, World!");
//! ```

pub mod manifest;
pub mod stripe;

#[cfg(test)]
mod proptest;

pub use manifest::{ShardManifest, MANIFEST_LEN};
pub use stripe::{StripeCodec, DEFAULT_BLOCK_SIZE};
