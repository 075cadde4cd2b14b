pub mod device_map;
pub mod loader;
pub mod naming;
pub mod paths;
pub mod request;
pub mod storage;
mod util;
pub mod worker;

mod stable_diffusion;

pub use device_map::*;
use image::DynamicImage;
pub use loader::*;
pub use naming::output_filename;
pub use paths::ModelPaths;
pub use request::{GenerationRequest, InvalidRequest};
pub use stable_diffusion::{
    StableDiffusionLoader, StableDiffusionModel, BASE_PIPELINE_REPO, TEXT_ENCODER_REPO,
};
pub use storage::ImageStore;
pub(crate) use util::*;
pub use worker::{GeneratedImage, JobError, PipelineHandle};

/// A loaded text-to-image pipeline.
///
/// Implementations are owned by a single [`PipelineHandle`] worker, so `run` takes
/// `&mut self` and never has to guard internal scratch state.
pub trait ModelLike: Send {
    fn run(&mut self, prompt: &str, steps: usize, scale: f64) -> anyhow::Result<DynamicImage>;
}
