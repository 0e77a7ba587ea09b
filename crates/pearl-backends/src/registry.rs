//! Maps a `<backend>/<model>` identifier to the adapter registered under the
//! `<backend>` prefix. The synthetic `anthropic-max` prefix is just another
//! registry entry pointing at an Anthropic adapter built in OAuth mode.

use std::collections::HashMap;
use std::sync::Arc;

use crate::chat::ChatBackend;
use crate::error::BackendError;

#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ChatBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        BackendRegistry {
            backends: HashMap::new(),
        }
    }

    pub fn register(&mut self, prefix: impl Into<String>, backend: Arc<dyn ChatBackend>) {
        self.backends.insert(prefix.into(), backend);
    }

    /// Splits `model_id` on the first `/`; the prefix selects the adapter.
    pub fn resolve(&self, model_id: &str) -> Result<Arc<dyn ChatBackend>, BackendError> {
        let prefix = model_id.split('/').next().unwrap_or(model_id);
        self.backends
            .get(prefix)
            .cloned()
            .ok_or_else(|| BackendError::Validation(format!("no backend registered for prefix '{prefix}'")))
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}
