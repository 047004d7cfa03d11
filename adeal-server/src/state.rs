//! Application state shared across all request handlers.

use adeal_core::config::AdminConfig;
use adeal_core::store::DealStore;
use std::sync::Arc;

/// Cloneable handle to everything a handler needs.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DealStore>,
    pub admin: Arc<AdminConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn DealStore>, admin: AdminConfig) -> Self {
        Self {
            store,
            admin: Arc::new(admin),
        }
    }
}
