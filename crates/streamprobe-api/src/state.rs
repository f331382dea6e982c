use std::path::PathBuf;
use std::sync::Arc;

use streamprobe_core::{Engine, WebhookDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub webhooks: Arc<WebhookDispatcher>,
    /// When set, stream CRUD persists the config list here.
    pub streams_file: Option<PathBuf>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, webhooks: Arc<WebhookDispatcher>) -> Self {
        Self {
            engine,
            webhooks,
            streams_file: None,
        }
    }

    pub fn with_streams_file(mut self, path: PathBuf) -> Self {
        self.streams_file = Some(path);
        self
    }

    pub fn persist_streams(&self) {
        if let Some(ref path) = self.streams_file {
            streamprobe_core::persist::save_streams(path, &self.engine.list_streams());
        }
    }
}
