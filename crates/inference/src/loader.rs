use crate::{backend::InferenceBackend, segmenter::Segmenter};
use image::{DynamicImage, RgbaImage};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::OnceCell;

/// A segmenter that finished loading, shared by every request for the rest
/// of the process.
pub struct LoadedModel<B: InferenceBackend> {
    pub device: &'static str,
    segmenter: Mutex<Segmenter<B>>,
}

impl<B: InferenceBackend> LoadedModel<B> {
    pub fn new(segmenter: Segmenter<B>) -> Self {
        Self {
            device: segmenter.device(),
            segmenter: Mutex::new(segmenter),
        }
    }

    /// Blocks until the segmenter is free. Call from blocking threads only.
    /// A panic in an earlier holder leaves no partial state behind, so the
    /// lock is taken even when poisoned.
    pub fn lock(&self) -> MutexGuard<'_, Segmenter<B>> {
        self.segmenter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// [`Segmenter::cutout`] under the lock, with a panic in the backend
    /// reported as an error for this image only.
    pub fn cutout(
        &self,
        image: &DynamicImage,
        threshold: Option<f32>,
    ) -> anyhow::Result<RgbaImage> {
        let mut segmenter = self.lock();
        panic::catch_unwind(AssertUnwindSafe(|| segmenter.cutout(image, threshold)))
            .unwrap_or_else(|payload| {
                Err(anyhow::anyhow!(
                    "Inference panicked: {}",
                    panic_message(payload.as_ref())
                ))
            })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

type InitFn<B> = dyn Fn() -> anyhow::Result<Segmenter<B>> + Send + Sync;

/// Loads the model on first use and caches it. Concurrent first callers
/// share one load; a failed load is retried by the next caller.
pub struct ModelLoader<B: InferenceBackend> {
    init: Arc<InitFn<B>>,
    cell: OnceCell<Arc<LoadedModel<B>>>,
}

impl<B: InferenceBackend + Send + 'static> ModelLoader<B> {
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> anyhow::Result<Segmenter<B>> + Send + Sync + 'static,
    {
        Self {
            init: Arc::new(init),
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> anyhow::Result<Arc<LoadedModel<B>>> {
        let model = self
            .cell
            .get_or_try_init(|| async {
                tracing::info!("Loading segmentation model");
                let start = Instant::now();

                let init = Arc::clone(&self.init);
                let segmenter = tokio::task::spawn_blocking(move || (*init)())
                    .await
                    .map_err(|e| anyhow::anyhow!("Model loading task failed: {}", e))??;

                let model = LoadedModel::new(segmenter);
                tracing::info!(
                    device = model.device,
                    elapsed_s = start.elapsed().as_secs_f64(),
                    "Segmentation model loaded"
                );
                Ok::<_, anyhow::Error>(Arc::new(model))
            })
            .await?;

        Ok(Arc::clone(model))
    }

    /// The cached model, without triggering a load.
    pub fn loaded(&self) -> Option<Arc<LoadedModel<B>>> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::InferenceOutput, config::ModelConfig};
    use ndarray::{Array, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Gpu;

    impl InferenceBackend for Gpu {
        fn load_model(_path: &str) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
            let shape = images.shape();
            Ok(InferenceOutput {
                mask: Array::zeros(IxDyn(&[1, 1, shape[2], shape[3]])),
            })
        }

        fn device(&self) -> &'static str {
            "cuda"
        }
    }

    fn counting_loader(calls: Arc<AtomicUsize>) -> ModelLoader<Gpu> {
        ModelLoader::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Segmenter::new(Gpu, &ModelConfig::default()))
        })
    }

    #[tokio::test]
    async fn test_model_is_loaded_lazily_and_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(calls.clone());

        assert!(loader.loaded().is_none(), "Nothing loads before first use");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let first = loader.get().await.unwrap();
        let second = loader.get().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.device, "cuda");
        assert!(loader.loaded().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = Arc::new(counting_loader(calls.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.get().await.map(|_| ()) })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader: ModelLoader<Gpu> = ModelLoader::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("weights missing");
            }
            Ok(Segmenter::new(Gpu, &ModelConfig::default()))
        });

        let err = loader.get().await.err().unwrap();
        assert!(err.to_string().contains("weights missing"));
        assert!(loader.loaded().is_none());

        assert!(loader.get().await.is_ok(), "Second attempt should retry");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_loaded_model_can_be_locked() {
        let loader = counting_loader(Arc::new(AtomicUsize::new(0)));
        let model = loader.get().await.unwrap();

        let guard = model.lock();
        assert_eq!(guard.device(), "cuda");
    }

    /// Panics on its first forward pass only.
    struct PanicsOnce {
        calls: usize,
    }

    impl InferenceBackend for PanicsOnce {
        fn load_model(_path: &str) -> anyhow::Result<Self> {
            Ok(Self { calls: 0 })
        }

        fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("output tensor missing");
            }
            let shape = images.shape();
            Ok(InferenceOutput {
                mask: Array::from_elem(IxDyn(&[1, 1, shape[2], shape[3]]), 20.0),
            })
        }
    }

    #[test]
    fn test_backend_panic_fails_one_image_and_keeps_model_usable() {
        let config = ModelConfig {
            input_size: (16, 16),
            ..ModelConfig::default()
        };
        let model = LoadedModel::new(Segmenter::new(PanicsOnce { calls: 0 }, &config));
        let image = DynamicImage::ImageRgb8(image::RgbImage::new(6, 4));

        let err = model.cutout(&image, None).unwrap_err();
        assert!(err.to_string().contains("output tensor missing"));

        for _ in 0..2 {
            let rgba = model.cutout(&image, None).unwrap();
            assert_eq!(rgba.dimensions(), (6, 4));
        }
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let model = Arc::new(LoadedModel::new(Segmenter::new(Gpu, &ModelConfig::default())));

        let holder = Arc::clone(&model);
        let result = std::thread::spawn(move || {
            let _guard = holder.lock();
            panic!("holder died");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(model.lock().device(), "cuda");
    }
}
