use crate::{auth::ApiKey, config::Config, metrics::PipelineMetrics};
use inference::{InferenceBackend, ModelLoader};
use std::sync::Arc;

pub struct AppState<B: InferenceBackend> {
    pub loader: Arc<ModelLoader<B>>,
    pub api_key: ApiKey,
    /// Reported by `/ping` until the model has loaded and resolved its device.
    pub expected_device: &'static str,
    pub metrics: Arc<PipelineMetrics>,
    pub max_upload_bytes: usize,
    pub max_entry_bytes: u64,
}

impl<B: InferenceBackend> AppState<B> {
    /// `expected_device` is where the model will run once loaded, resolved
    /// up front so `/ping` never has to load it.
    pub fn new(loader: ModelLoader<B>, config: &Config, expected_device: &'static str) -> Self {
        Self {
            loader: Arc::new(loader),
            api_key: ApiKey::new(config.api_key()),
            expected_device,
            metrics: Arc::new(PipelineMetrics::new("gateway")),
            max_upload_bytes: config.max_upload_bytes,
            max_entry_bytes: config.max_entry_bytes,
        }
    }
}

// Manual impl: a derive would demand `B: Clone`.
impl<B: InferenceBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            api_key: self.api_key.clone(),
            expected_device: self.expected_device,
            metrics: Arc::clone(&self.metrics),
            max_upload_bytes: self.max_upload_bytes,
            max_entry_bytes: self.max_entry_bytes,
        }
    }
}
