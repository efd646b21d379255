use crate::dispatch::Dispatcher;
use crate::pending::PendingRequests;
use crate::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;

/// Axum application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub pending: Arc<PendingRequests>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(request_timeout: Duration) -> Self {
        let registry = Arc::new(Registry::new());
        let pending = Arc::new(PendingRequests::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            pending.clone(),
            request_timeout,
        ));
        Self {
            registry,
            pending,
            dispatcher,
        }
    }
}
