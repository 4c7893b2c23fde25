use ndarray::{Array, IxDyn};
use serde::Deserialize;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Where the session runs. `Auto` tries CUDA and falls back to CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl ExecutionProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProvider::Auto => "auto",
            ExecutionProvider::Cpu => "cpu",
            ExecutionProvider::Cuda => "cuda",
        }
    }

    /// The device this provider ends up on. `cuda_available` is only
    /// consulted for `Auto`.
    pub fn resolve(self, cuda_available: impl FnOnce() -> bool) -> &'static str {
        match self {
            ExecutionProvider::Cpu => "cpu",
            ExecutionProvider::Cuda => "cuda",
            ExecutionProvider::Auto if cuda_available() => "cuda",
            ExecutionProvider::Auto => "cpu",
        }
    }
}

pub trait InferenceBackend {
    fn load_model(path: &str) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Run the forward pass on a `[1, 3, H, W]` normalized image tensor.
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput>;

    /// Device the model actually runs on (`"cpu"` or `"cuda"`).
    fn device(&self) -> &'static str {
        "cpu"
    }
}

pub struct InferenceOutput {
    pub mask: ndarray::ArrayD<f32>, // [1, 1, H, W] foreground logits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_provider_names() {
        assert_eq!(ExecutionProvider::default(), ExecutionProvider::Auto);
        assert_eq!(ExecutionProvider::Cuda.as_str(), "cuda");
        assert_eq!(ExecutionProvider::Cpu.as_str(), "cpu");
        assert_eq!(ExecutionProvider::Auto.as_str(), "auto");
    }

    #[test]
    fn test_resolve_only_checks_cuda_for_auto() {
        let unreachable = || panic!("explicit providers never check for CUDA");
        assert_eq!(ExecutionProvider::Cpu.resolve(unreachable), "cpu");
        assert_eq!(ExecutionProvider::Cuda.resolve(unreachable), "cuda");

        assert_eq!(ExecutionProvider::Auto.resolve(|| true), "cuda");
        assert_eq!(ExecutionProvider::Auto.resolve(|| false), "cpu");
    }
}
