use crate::backend::ExecutionProvider;

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (1024, 1024);
pub const DEFAULT_MODEL_PATH: &str = "/app/weights/birefnet_finetuned_toonout.onnx";

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: String,
    pub provider: ExecutionProvider,
    pub input_size: (u32, u32),
    pub input_name: String,
    pub output_name: String,
    /// Set to false for exports whose graph already ends in a sigmoid.
    pub apply_sigmoid: bool,
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: DEFAULT_MODEL_PATH.to_string(),
            provider: ExecutionProvider::Auto,
            input_size: DEFAULT_INPUT_SIZE,
            input_name: "input_image".to_string(),
            output_name: "output_image".to_string(),
            apply_sigmoid: true,
            intra_threads: 4,
        }
    }
}
