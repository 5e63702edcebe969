//! Connector Set
//!
//! The three storage connectors of the array, kept in shard-index order.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::domain::ports::{ShardIndex, StorageConnector, SHARD_COUNT};
use crate::error::{Error, Result};

/// Exactly three connectors; position `i` holds shard index `i`.
#[derive(Clone)]
pub struct ConnectorSet {
    connectors: [Arc<dyn StorageConnector>; SHARD_COUNT],
}

impl std::fmt::Debug for ConnectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.connectors.iter().map(|c| c.name()))
            .finish()
    }
}

impl ConnectorSet {
    /// Validate and wrap the connectors.
    pub fn new(connectors: Vec<Arc<dyn StorageConnector>>) -> Result<Self> {
        let count = connectors.len();
        let connectors: [Arc<dyn StorageConnector>; SHARD_COUNT] =
            connectors.try_into().map_err(|_| {
                Error::Config(format!(
                    "exactly {} storage connectors required, got {}",
                    SHARD_COUNT, count
                ))
            })?;

        for (position, connector) in connectors.iter().enumerate() {
            let index = connector.shard_index().get();
            if index != position {
                return Err(Error::Config(format!(
                    "connector {} at position {} is bound to shard index {}",
                    connector.name(),
                    position,
                    index
                )));
            }
        }

        Ok(Self { connectors })
    }

    pub fn get(&self, index: ShardIndex) -> &Arc<dyn StorageConnector> {
        &self.connectors[index.get()]
    }

    /// Connectors in shard-index order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn StorageConnector>> {
        self.connectors.iter()
    }

    /// Connect all three concurrently. Returns `true` only if every connector
    /// came up.
    pub async fn connect_all(&self) -> bool {
        let results = join_all(self.connectors.iter().map(|c| c.connect())).await;
        for (connector, ok) in self.connectors.iter().zip(&results) {
            if *ok {
                info!(connector = %connector.name(), "Storage connector ready");
            } else {
                warn!(connector = %connector.name(), "Storage connector unavailable");
            }
        }
        results.into_iter().all(|ok| ok)
    }
}
