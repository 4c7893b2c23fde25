use super::{ExecutionProvider, InferenceBackend, InferenceOutput};
use crate::config::ModelConfig;
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider as _},
    session::{
        Session,
        builder::{GraphOptimizationLevel, SessionBuilder},
    },
    value::TensorRef,
};

pub struct OrtBackend {
    session: Session,
    input_name: String,
    output_name: String,
    device: &'static str,
}

impl OrtBackend {
    /// Load the model described by `config`, resolving `Auto` to a concrete provider.
    pub fn load(config: &ModelConfig) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let (session, device) = match config.provider {
            ExecutionProvider::Cuda => (open_session(config, ExecutionProvider::Cuda)?, "cuda"),
            ExecutionProvider::Cpu => (open_session(config, ExecutionProvider::Cpu)?, "cpu"),
            ExecutionProvider::Auto => match open_session(config, ExecutionProvider::Cuda) {
                Ok(session) => (session, "cuda"),
                Err(e) => {
                    tracing::warn!(error = %e, "CUDA unavailable, falling back to CPU");
                    (open_session(config, ExecutionProvider::Cpu)?, "cpu")
                }
            },
        };

        tracing::info!(path = %config.model_path, device, "Model loaded");
        Ok(Self {
            session,
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
            device,
        })
    }

    /// Device a session for `provider` would run on, without loading a model.
    pub fn resolve_device(provider: ExecutionProvider) -> &'static str {
        provider.resolve(|| {
            let _ = ort::init().commit();
            match CUDAExecutionProvider::default().is_available() {
                Ok(available) => available,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not query CUDA availability");
                    false
                }
            }
        })
    }
}

fn session_builder(intra_threads: usize) -> anyhow::Result<SessionBuilder> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?)
}

fn open_session(config: &ModelConfig, provider: ExecutionProvider) -> anyhow::Result<Session> {
    let mut builder = session_builder(config.intra_threads)?;

    if provider == ExecutionProvider::Cuda {
        tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
        builder = builder.with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(0)
                .build()
                .error_on_failure(),
        ])?;
    } else {
        tracing::info!("Initializing ONNX Runtime with CPU execution provider");
    }

    Ok(builder.commit_from_file(&config.model_path)?)
}

impl InferenceBackend for OrtBackend {
    fn load_model(path: &str) -> anyhow::Result<Self> {
        Self::load(&ModelConfig {
            model_path: path.to_string(),
            ..ModelConfig::default()
        })
    }

    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
        let outputs = self.session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(images.view())?
        ])?;

        // Exports differ in how they name the mask; the network's last output is the final one.
        let output = match outputs.get(self.output_name.as_str()) {
            Some(output) => output,
            None => {
                let last = outputs.values().last().ok_or_else(|| {
                    anyhow::anyhow!("Model produced no outputs")
                })?;
                tracing::debug!(
                    output_name = %self.output_name,
                    "Configured output not found, using the last model output"
                );
                last
            }
        };
        let mask = output.try_extract_array::<f32>()?;

        Ok(InferenceOutput {
            mask: mask.into_owned(),
        })
    }

    fn device(&self) -> &'static str {
        self.device
    }
}
