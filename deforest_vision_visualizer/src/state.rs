//! Application state for the HTTP server.

use crate::config::ServerConfig;
use crate::store::ResultStore;
use deforest_vision::SequencePipeline;
use deforest_vision::narrative::Narrator;
use std::sync::Arc;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub pipeline: Arc<SequencePipeline>,
    pub store: Arc<ResultStore>,
    /// `None` disables the chat endpoint.
    pub narrator: Option<Arc<dyn Narrator>>,
}

impl AppState {
    pub fn new(config: ServerConfig, pipeline: SequencePipeline, narrator: Option<Arc<dyn Narrator>>) -> Self {
        let store = Arc::new(ResultStore::new(config.max_stored_results));
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            store,
            narrator,
        }
    }
}
