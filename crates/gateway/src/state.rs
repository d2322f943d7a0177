//! Shared application state for the gateway.

use chrono::{DateTime, Utc};
use lens_config::AppConfig;
use lens_core::Store;
use lens_ingest::Ingestor;
use lens_pricing::PricingCatalog;
use std::sync::Arc;

/// Everything a handler needs, shared across request tasks.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub catalog: Arc<PricingCatalog>,
    pub ingestor: Ingestor,
    pub config: AppConfig,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<PricingCatalog>,
        config: AppConfig,
    ) -> SharedState {
        let ingestor = Ingestor::new(store.clone(), catalog.clone());
        Arc::new(Self {
            store,
            catalog,
            ingestor,
            config,
            started_at: Utc::now(),
        })
    }
}
