pub mod backend;
pub mod codec;
pub mod config;
pub mod loader;
pub mod processing;
pub mod segmenter;

// Re-export commonly used types for convenience
pub use backend::{ExecutionProvider, InferenceBackend, InferenceOutput};
pub use config::ModelConfig;
pub use loader::{LoadedModel, ModelLoader};
pub use segmenter::Segmenter;
