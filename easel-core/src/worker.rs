//! Single-owner access to the pipeline.
//!
//! The model lives on one dedicated OS thread and is fed through a bounded queue, so
//! exactly one generation runs at a time and the async runtime never blocks on it.
//! The worker also writes the output file, which keeps writers of an identical
//! filename from racing each other.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use image::DynamicImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::{GenerationRequest, ImageStore, InvalidRequest, ModelLike};

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub filename: String,
    pub path: PathBuf,
    pub elapsed: Duration,
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Invalid(#[from] InvalidRequest),
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
    #[error("failed to save image: {0:#}")]
    Storage(anyhow::Error),
    #[error("pipeline worker is not running")]
    WorkerGone,
}

struct Job {
    request: GenerationRequest,
    reply: oneshot::Sender<Result<GeneratedImage, JobError>>,
}

#[derive(Clone, Debug)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Job>,
}

impl PipelineHandle {
    /// Moves `model` onto a dedicated worker thread. At most `capacity` jobs wait in the
    /// queue; further submitters wait for a free slot.
    ///
    /// The worker exits once every handle has been dropped.
    pub fn spawn<M>(model: M, store: ImageStore, capacity: usize) -> std::io::Result<Self>
    where
        M: ModelLike + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        std::thread::Builder::new()
            .name("easel-pipeline".to_string())
            .spawn(move || run_worker(model, store, rx))?;
        Ok(Self { tx })
    }

    /// Validates `request`, queues it and waits for the saved image.
    ///
    /// Dropping the returned future stops waiting but not the generation: a queued job
    /// still runs and its file is still written.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GeneratedImage, JobError> {
        request.validate()?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { request, reply })
            .await
            .map_err(|_| JobError::WorkerGone)?;
        rx.await.map_err(|_| JobError::WorkerGone)?
    }
}

fn run_worker<M: ModelLike>(mut model: M, store: ImageStore, mut rx: mpsc::Receiver<Job>) {
    info!("pipeline worker started");
    while let Some(Job { request, reply }) = rx.blocking_recv() {
        let result = process(&mut model, &store, &request);
        match &result {
            Ok(image) => info!(
                filename = %image.filename,
                elapsed_ms = image.elapsed.as_millis() as u64,
                "image generated"
            ),
            Err(e) => error!(prompt = %request.prompt, "{e}"),
        }
        if reply.send(result).is_err() {
            debug!(prompt = %request.prompt, "requester went away before the job finished");
        }
    }
    info!("pipeline worker stopped");
}

fn process<M: ModelLike>(
    model: &mut M,
    store: &ImageStore,
    request: &GenerationRequest,
) -> Result<GeneratedImage, JobError> {
    let start = Instant::now();
    let filename = request.filename();
    let image = run_model(model, request).map_err(JobError::Generation)?;
    let path = store.save(&filename, &image).map_err(JobError::Storage)?;
    Ok(GeneratedImage {
        filename,
        path,
        elapsed: start.elapsed(),
    })
}

/// Runs one generation, turning a panic inside the model into an error so the worker
/// survives for the next job.
fn run_model<M: ModelLike>(model: &mut M, request: &GenerationRequest) -> anyhow::Result<DynamicImage> {
    let steps = request.steps as usize;
    panic::catch_unwind(AssertUnwindSafe(|| {
        model.run(&request.prompt, steps, request.scale)
    }))
    .unwrap_or_else(|payload| Err(anyhow!("pipeline panicked: {}", panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}
