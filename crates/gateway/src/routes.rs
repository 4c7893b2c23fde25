use crate::{
    archive::{self, UploadedArchive},
    auth::require_api_key,
    error::ApiError,
    state::AppState,
};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError,
        rejection::QueryRejection,
    },
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use inference::{
    InferenceBackend,
    codec::{decode_image, encode_png},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub const RESULT_FILENAME: &str = "cutouts.zip";

pub fn router<B>(state: AppState<B>) -> Router
where
    B: InferenceBackend + Send + 'static,
{
    let protected = Router::new()
        .route("/ping", get(ping::<B>))
        .route("/cutout_zip", post(cutout_zip::<B>))
        .route_layer(middleware::from_fn_with_state(
            state.api_key.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/", get(root))
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "ToonOut API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/ping": "Health check",
            "/cutout_zip": "POST a ZIP of images to remove backgrounds",
        }
    }))
}

/// Never triggers a model load.
async fn ping<B>(State(state): State<AppState<B>>) -> Json<Value>
where
    B: InferenceBackend + Send + 'static,
{
    let device = state
        .loader
        .loaded()
        .map(|model| model.device)
        .unwrap_or(state.expected_device);

    Json(json!({ "status": "ok", "device": device }))
}

#[derive(Debug, Deserialize)]
pub struct CutoutParams {
    /// Hard mask cutoff in [0, 1]; soft edges when absent.
    pub threshold: Option<f32>,
}

fn validate_threshold(threshold: Option<f32>) -> Result<Option<f32>, ApiError> {
    match threshold {
        Some(t) if !(0.0..=1.0).contains(&t) => Err(ApiError::BadRequest(format!(
            "threshold must be between 0 and 1, got {}",
            t
        ))),
        other => Ok(other),
    }
}

struct Upload {
    file_name: String,
    bytes: Vec<u8>,
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(format!("Malformed multipart body: {}", e.body_text()))
    }
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Upload {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    Err(ApiError::BadRequest(
        "Missing multipart field 'file'".to_string(),
    ))
}

async fn cutout_zip<B>(
    State(state): State<AppState<B>>,
    params: Result<Query<CutoutParams>, QueryRejection>,
    mut multipart: Multipart,
) -> Result<Response, ApiError>
where
    B: InferenceBackend + Send + 'static,
{
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let threshold = validate_threshold(params.threshold)?;
    let Upload { file_name, bytes } = read_upload(&mut multipart).await?;

    if !archive::is_zip_filename(&file_name) {
        return Err(ApiError::BadRequest(
            "Upload must be a .zip file".to_string(),
        ));
    }

    tracing::info!(upload = %file_name, bytes = bytes.len(), ?threshold, "Received archive");

    let max_entry_bytes = state.max_entry_bytes;
    let uploaded = tokio::task::spawn_blocking(move || {
        UploadedArchive::open(bytes).map(|archive| archive.with_max_entry_bytes(max_entry_bytes))
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Archive validation task failed: {}", e)))??;

    let metrics = Arc::clone(&state.metrics);
    let loader = Arc::clone(&state.loader);
    let runtime = tokio::runtime::Handle::current();
    let report = tokio::task::spawn_blocking(move || {
        uploaded.cutout_all(&file_name, &metrics, |name, bytes| {
            let image = decode_image(bytes)?;
            tracing::info!(name, width = image.width(), height = image.height(), "Loaded image");
            // A failed load only fails this image; the next one retries it.
            let model = runtime.block_on(loader.get())?;
            let rgba = model.cutout(&image, threshold)?;
            encode_png(&rgba)
        })
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Batch task failed: {}", e)))??;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", RESULT_FILENAME),
            ),
        ],
        report.archive,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_validation() {
        assert_eq!(validate_threshold(None).unwrap(), None);
        assert_eq!(validate_threshold(Some(0.0)).unwrap(), Some(0.0));
        assert_eq!(validate_threshold(Some(1.0)).unwrap(), Some(1.0));
        assert_eq!(validate_threshold(Some(0.35)).unwrap(), Some(0.35));
        assert!(validate_threshold(Some(-0.1)).is_err());
        assert!(validate_threshold(Some(1.5)).is_err());
        assert!(validate_threshold(Some(f32::NAN)).is_err());
    }
}
