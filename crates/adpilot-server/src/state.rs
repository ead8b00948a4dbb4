use std::collections::HashSet;
use std::sync::Arc;

use adpilot_core::Engine;
use tokio::sync::Mutex;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Accounts with a backfill running in a background task.
    pub backfills: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            backfills: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}
