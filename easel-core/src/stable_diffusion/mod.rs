use std::time::Instant;

use anyhow::{ensure, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    ddim::DDIMSchedulerConfig, schedulers::SchedulerConfig, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

mod bundles;
mod clip;
mod scheduler_config;
mod unet_config;

pub use bundles::{BASE_PIPELINE_REPO, TEXT_ENCODER_REPO};

use crate::{select_best_device, tensor_to_image, DeviceMap, Loader, ModelLike, ModelPaths};
use bundles::{pad_token_id, read_json, SpecialTokens, TextEncoderSettings, VaeSettings};
use clip::ClipTextTransformer;
use scheduler_config::SchedulerSettings;
use unet_config::{UNetArchitecture, LATENT_CHANNELS};

/// Stable Diffusion 2.1 base scaffolding with an OpenCLIP ViT-H text tower and a
/// locally fine-tuned denoising network.
pub struct StableDiffusionModel {
    device: Device,
    dtype: DType,
    height: usize,
    width: usize,
    scheduler: DDIMSchedulerConfig,
    tokenizer: Tokenizer,
    max_tokens: usize,
    pad_id: u32,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    vae_scale: f64,
}

impl StableDiffusionModel {
    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        tokens.resize(self.max_tokens, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }

    /// Prompt embeddings, preceded by the empty-prompt embeddings when guidance is on.
    fn text_embeddings(&self, prompt: &str, guided: bool) -> Result<Tensor> {
        let cond = self.encode_prompt(prompt)?;
        let embeddings = if guided {
            let uncond = self.encode_prompt("")?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        };
        Ok(embeddings.to_dtype(self.dtype)?)
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(&mut self, prompt: &str, steps: usize, scale: f64) -> Result<DynamicImage> {
        // Classifier-free guidance only kicks in above 1.
        let guided = scale > 1.0;
        let mut scheduler = self.scheduler.build(steps)?;
        let text_embeddings = self.text_embeddings(prompt, guided)?;

        // --- Initial noise, scaled for the scheduler ---
        let latent_shape = (
            1,
            LATENT_CHANNELS,
            self.height / bundles::VAE_SCALE_FACTOR,
            self.width / bundles::VAE_SCALE_FACTOR,
        );
        let latents = Tensor::randn(0f32, 1f32, latent_shape, &self.device)?.to_dtype(self.dtype)?;
        let mut latents = (latents * scheduler.init_noise_sigma())?;

        // --- Denoising loop ---
        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            let start = Instant::now();
            let model_input = if guided {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if guided {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            debug!(
                step = index + 1,
                steps = timesteps.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "denoising step"
            );
        }

        // --- Decode and convert to 8-bit RGB ---
        let image = self.vae.decode(&(latents / self.vae_scale)?)?;
        let image = ((image / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let image = (image.clamp(0f32, 1f32)? * 255.)?
            .to_dtype(DType::U8)?
            .i(0)?;

        tensor_to_image(&image)
    }
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    async fn load(paths: &ModelPaths, api: Api, device_map: DeviceMap) -> Result<Self::Model> {
        // --- Check the local override before downloading anything ---
        paths.validate()?;
        let unet_arch = UNetArchitecture::from_file(&paths.unet_config)?;
        let unet_config = unet_arch.to_candle()?;
        unet_arch.verify_weights(&paths.unet_weights)?;

        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = DType::F32;
        let size = unet_arch.image_size();
        let config = StableDiffusionConfig::v2_1(None, Some(size), Some(size));
        info!(?device, size, "loading pipeline");

        // --- Tokenizer and text encoder ---
        let text_repo = api.model(TEXT_ENCODER_REPO.to_string());
        let text_config = read_json::<TextEncoderSettings>(
            &text_repo
                .get(bundles::TEXT_ENCODER_CONFIG)
                .await
                .context("failed to get text encoder config")?,
        )?
        .text_config;
        ensure!(
            text_config.hidden_size == unet_config.cross_attention_dim,
            "text encoder hidden size {} does not match UNet cross_attention_dim {}",
            text_config.hidden_size,
            unet_config.cross_attention_dim
        );
        let max_tokens = text_config.max_position_embeddings;

        let tokenizer_file = text_repo
            .get(bundles::TEXT_ENCODER_TOKENIZER)
            .await
            .context("failed to get CLIP tokenizer")?;
        let mut tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                ..Default::default()
            }))
            .map_err(Error::msg)?;
        let special_tokens: SpecialTokens = read_json(
            &text_repo
                .get(bundles::TEXT_ENCODER_SPECIAL_TOKENS)
                .await
                .context("failed to get CLIP special tokens")?,
        )?;
        let pad_id = pad_token_id(&tokenizer, &special_tokens)?;

        let text_weights = text_repo
            .get(bundles::TEXT_ENCODER_WEIGHTS)
            .await
            .context("failed to get CLIP model file")?;
        let text_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[text_weights], dtype, &device)
                .context("failed to build CLIP var builder")?
        };
        let text_model = ClipTextTransformer::new(text_vb.pp("text_model"), &text_config)
            .context("failed to load CLIP text encoder")?;
        info!(
            repo = TEXT_ENCODER_REPO,
            layers = text_model.num_layers(),
            pad_id,
            "loaded text encoder"
        );

        // --- Scheduler and autoencoder from the base pipeline ---
        let base_repo = api.model(BASE_PIPELINE_REPO.to_string());
        let scheduler_settings: SchedulerSettings = read_json(
            &base_repo
                .get(bundles::SCHEDULER_CONFIG)
                .await
                .context("failed to get scheduler config")?,
        )?;
        debug!(
            class = ?scheduler_settings.class_name,
            "sampling with DDIM using the bundle's schedule"
        );
        let scheduler = scheduler_settings.to_ddim();

        let vae_settings: VaeSettings = read_json(
            &base_repo
                .get(bundles::VAE_CONFIG)
                .await
                .context("failed to get autoencoder config")?,
        )?;
        let vae_weights = base_repo
            .get(bundles::VAE_WEIGHTS)
            .await
            .context("failed to get autoencoder model file")?;
        let vae = config
            .build_vae(vae_weights, &device, dtype)
            .context("failed to load autoencoder")?;
        info!(repo = BASE_PIPELINE_REPO, "loaded scheduler and autoencoder");

        // --- Fine-tuned denoising network replaces the base one ---
        let unet_vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(&[&paths.unet_weights], dtype, &device)
                .context("failed to build UNet var builder")?
        };
        let unet = UNet2DConditionModel::new(
            unet_vb,
            LATENT_CHANNELS,
            LATENT_CHANNELS,
            cfg!(feature = "flash-attn"),
            unet_config,
        )
        .with_context(|| {
            format!(
                "failed to load fine-tuned UNet from {}",
                paths.unet_weights.display()
            )
        })?;
        info!(weights = %paths.unet_weights.display(), "loaded fine-tuned UNet");

        Ok(StableDiffusionModel {
            device,
            dtype,
            height: config.height,
            width: config.width,
            scheduler,
            tokenizer,
            max_tokens,
            pad_id,
            text_model,
            unet,
            vae,
            vae_scale: vae_settings.scaling_factor,
        })
    }
}
