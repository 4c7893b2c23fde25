use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};

/// Batch pipeline instruments. Recording is a no-op unless a meter provider
/// was installed by `common::TelemetryGuard`.
pub struct PipelineMetrics {
    pub image_duration: Histogram<f64>,
    pub images: Counter<u64>,
    pub failed_images: Counter<u64>,
    pub batches: Counter<u64>,
}

impl PipelineMetrics {
    pub fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0, 7.5, 10.0, 20.0, 30.0,
        ];

        let image_duration = meter
            .f64_histogram("cutout_image_duration_seconds")
            .with_description("Time to cut out a single image (decode + infer + encode)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build();
        let images = meter
            .u64_counter("cutout_images_total")
            .with_description("Total images taken from uploaded archives")
            .build();
        let failed_images = meter
            .u64_counter("cutout_images_failed_total")
            .with_description("Images replaced by an error marker")
            .build();
        let batches = meter
            .u64_counter("cutout_batches_total")
            .with_description("Archives processed")
            .build();

        Self {
            image_duration,
            images,
            failed_images,
            batches,
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new("gateway")
    }
}
