use crate::{
    backend::{InferenceBackend, InferenceOutput},
    config::ModelConfig,
    processing::{
        post::{MaskPostProcessor, compose_rgba},
        pre::PreProcessor,
    },
};
use image::{DynamicImage, RgbaImage};

/// Background removal for a single image: preprocess, forward pass, alpha mask.
pub struct Segmenter<B: InferenceBackend> {
    backend: B,
    preprocessor: PreProcessor,
    postprocessor: MaskPostProcessor,
}

impl<B: InferenceBackend> Segmenter<B> {
    pub fn new(backend: B, config: &ModelConfig) -> Self {
        Self {
            backend,
            preprocessor: PreProcessor::new(config.input_size),
            postprocessor: MaskPostProcessor::new(config.apply_sigmoid),
        }
    }

    pub fn device(&self) -> &'static str {
        self.backend.device()
    }

    /// Returns `image` as RGBA with the predicted foreground mask as alpha.
    /// The output has the same dimensions as `image`.
    pub fn cutout(
        &mut self,
        image: &DynamicImage,
        threshold: Option<f32>,
    ) -> anyhow::Result<RgbaImage> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let input = self.preprocessor.preprocess(&rgb)?;

        let InferenceOutput { mask } = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            self.backend.infer(&input)?
        };

        let alpha = self
            .postprocessor
            .to_alpha(&mask.view(), width, height, threshold)?;

        compose_rgba(&rgb, &alpha)
    }
}
