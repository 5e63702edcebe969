//! Core Context
//!
//! Collaborators shared by every slot of the pool.

use std::sync::Arc;

use crate::config::CoreConfig;
use crate::engine::connectors::ConnectorSet;
use crate::domain::ports::{ErasureCodec, EventPublisher, MetadataStore};
use crate::metrics::CoreMetrics;

/// Everything a slot needs to run a job.
pub struct CoreContext {
    pub config: CoreConfig,
    pub metadata: Arc<dyn MetadataStore>,
    pub codec: Arc<dyn ErasureCodec>,
    pub connectors: ConnectorSet,
    pub events: Arc<dyn EventPublisher>,
    pub metrics: CoreMetrics,
}

impl CoreContext {
    pub fn new(
        config: CoreConfig,
        metadata: Arc<dyn MetadataStore>,
        codec: Arc<dyn ErasureCodec>,
        connectors: ConnectorSet,
        events: Arc<dyn EventPublisher>,
        metrics: CoreMetrics,
    ) -> Self {
        Self {
            config,
            metadata,
            codec,
            connectors,
            events,
            metrics,
        }
    }
}

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("config", &self.config)
            .field("connectors", &self.connectors)
            .finish()
    }
}
