use std::path::Path;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    routing::post,
    Router,
};
use easel_core::{GenerationRequest, PipelineHandle};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::error::ApiError;

/// URL prefix the output directory is served under.
pub const GENERATED_PREFIX: &str = "/generated";

/// Bytes escaped when a filename becomes a URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

fn image_url(filename: &str) -> String {
    format!(
        "{GENERATED_PREFIX}/{}",
        utf8_percent_encode(filename, PATH_SEGMENT)
    )
}

#[derive(Serialize)]
struct GenerationResponse {
    url: String,
}

#[derive(Clone)]
pub struct AppState {
    pipeline: PipelineHandle,
    timeout: Duration,
}

impl AppState {
    pub fn new(pipeline: PipelineHandle, timeout: Duration) -> Self {
        Self { pipeline, timeout }
    }
}

pub fn router(state: AppState, output_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/generate", post(generate_image_handler))
        .nest_service(GENERATED_PREFIX, ServeDir::new(output_dir))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Waits for the pipeline worker to produce and save the image, then answers with the
/// URL it is served under. The file exists before the response is sent.
async fn generate_image_handler(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let Json(request) = payload?;
    let image = tokio::time::timeout(state.timeout, state.pipeline.generate(request))
        .await
        .map_err(|_| ApiError::Timeout(state.timeout))??;
    Ok(Json(GenerationResponse {
        url: image_url(&image.filename),
    }))
}
