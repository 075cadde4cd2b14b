use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use easel_core::{
    DeviceMap, ImageStore, Loader, ModelPaths, PipelineHandle, StableDiffusionLoader,
    BASE_PIPELINE_REPO, TEXT_ENCODER_REPO,
};
use hf_hub::api::tokio::Api;
use tokio::{self, net::TcpListener};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;
mod routes;

const DEFAULT_LOG_FILTER: &str = "info,easel_core=info,easel_server=info,tower_http=info";

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Easel image generation server")]
struct Args {
    /// diffusers config.json describing the fine-tuned UNet
    #[arg(long, env = "EASEL_UNET_CONFIG", value_name = "FILE")]
    unet_config: PathBuf,

    /// Fine-tuned UNet weights in .safetensors format
    #[arg(long, env = "EASEL_UNET_WEIGHTS", value_name = "FILE")]
    unet_weights: PathBuf,

    /// Directory generated images are written to and served from
    #[arg(long, env = "EASEL_OUTPUT_DIR", default_value = "generated")]
    output_dir: PathBuf,

    /// Run on this GPU instead of the CPU
    #[arg(long, env = "EASEL_GPU", value_name = "ORDINAL")]
    gpu: Option<usize>,

    /// Seconds a request waits for its image before giving up
    #[arg(long, env = "EASEL_REQUEST_TIMEOUT_SECS", default_value_t = 600)]
    request_timeout_secs: u64,

    /// Generation requests allowed to wait for the pipeline at once
    #[arg(long, env = "EASEL_QUEUE_CAPACITY", default_value_t = 8)]
    queue_capacity: usize,

    /// Host address to bind the server to
    #[arg(long, env = "EASEL_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, env = "EASEL_PORT", default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();
    let args = Args::parse();

    let store = ImageStore::open(&args.output_dir)?;
    let paths = ModelPaths::new(args.unet_config, args.unet_weights);

    // --- Load the pipeline once; any failure aborts startup ---
    info!(
        text_encoder = TEXT_ENCODER_REPO,
        base = BASE_PIPELINE_REPO,
        unet = %paths.unet_weights.display(),
        "loading models"
    );
    let model =
        StableDiffusionLoader::load(&paths, Api::new()?, DeviceMap::from_gpu(args.gpu)).await?;
    let pipeline = PipelineHandle::spawn(model, store.clone(), args.queue_capacity)
        .context("failed to start pipeline worker")?;

    let state = routes::AppState::new(pipeline, Duration::from_secs(args.request_timeout_secs));
    let app = routes::router(state, store.dir());

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(
        output_dir = %store.dir().display(),
        "Started server on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app).await?;

    Ok(())
}
