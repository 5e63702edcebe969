//! Distribution Engine
//!
//! The file status state machine, the bounded slot pool that runs it and
//! the service facade callers use.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   get_slot   ┌──────────────────┐
//! │  CloudRaidService  │─────────────▶│  CoreAccessPool  │
//! └────────────────────┘              └────────┬─────────┘
//!                                              │ PooledSlot
//!                                              ▼
//!                                     ┌──────────────────┐
//!                                     │    CoreAccess    │
//!                                     │ (state machine)  │
//!                                     └────────┬─────────┘
//!                     ┌────────────────────────┼───────────────────────┐
//!                     ▼                        ▼                       ▼
//!              ErasureCodec             ConnectorSet (×3)        MetadataStore
//! ```

pub mod connectors;
pub mod context;
pub mod outcome;
pub mod pool;
pub mod service;
pub mod state_machine;

pub use connectors::ConnectorSet;
pub use context::CoreContext;
pub use outcome::{JobFailure, JobOutcome};
pub use pool::{CoreAccessPool, PooledSlot};
pub use service::CloudRaidService;
pub use state_machine::{CoreAccess, SlotState};
