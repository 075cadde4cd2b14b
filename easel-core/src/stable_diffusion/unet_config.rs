//! Translation of a diffusers `UNet2DConditionModel` `config.json` into candle's
//! UNet configuration, plus a cheap shape check of the matching weights file.

use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use candle_transformers::models::stable_diffusion::unet_2d::{
    BlockConfig, UNet2DConditionModelConfig,
};
use serde::Deserialize;

use super::bundles::{read_json, VAE_SCALE_FACTOR};

/// Latent channels of the SD autoencoder; candle's UNet builder always emits this many.
pub const LATENT_CHANNELS: usize = 4;

/// A per-block setting given either once for every block or as one entry per block.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PerBlock {
    Uniform(usize),
    Each(Vec<usize>),
}

impl PerBlock {
    fn resolve(&self, blocks: usize, field: &str) -> Result<Vec<usize>> {
        match self {
            Self::Uniform(v) => Ok(vec![*v; blocks]),
            Self::Each(v) if v.len() == blocks => Ok(v.clone()),
            Self::Each(v) => bail!("{field} lists {} entries for {blocks} blocks", v.len()),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UNetArchitecture {
    #[serde(default = "default_channels")]
    pub in_channels: usize,
    #[serde(default = "default_channels")]
    pub out_channels: usize,
    pub block_out_channels: Vec<usize>,
    pub down_block_types: Vec<String>,
    #[serde(default = "default_layers_per_block")]
    pub layers_per_block: usize,
    #[serde(default = "default_attention_head_dim")]
    pub attention_head_dim: PerBlock,
    /// Newer diffusers configs spell the head count out; it wins over `attention_head_dim`.
    #[serde(default)]
    pub num_attention_heads: Option<PerBlock>,
    #[serde(default = "default_transformer_layers")]
    pub transformer_layers_per_block: PerBlock,
    #[serde(default = "default_cross_attention_dim")]
    pub cross_attention_dim: usize,
    #[serde(default)]
    pub use_linear_projection: bool,
    #[serde(default = "default_norm_num_groups")]
    pub norm_num_groups: usize,
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f64,
    #[serde(default = "default_true")]
    pub flip_sin_to_cos: bool,
    #[serde(default)]
    pub freq_shift: f64,
    #[serde(default)]
    pub center_input_sample: bool,
    #[serde(default = "default_downsample_padding")]
    pub downsample_padding: usize,
    #[serde(default = "default_mid_block_scale_factor")]
    pub mid_block_scale_factor: f64,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

fn default_channels() -> usize {
    LATENT_CHANNELS
}
fn default_layers_per_block() -> usize {
    2
}
fn default_attention_head_dim() -> PerBlock {
    PerBlock::Uniform(8)
}
fn default_transformer_layers() -> PerBlock {
    PerBlock::Uniform(1)
}
fn default_cross_attention_dim() -> usize {
    1280
}
fn default_norm_num_groups() -> usize {
    32
}
fn default_norm_eps() -> f64 {
    1e-5
}
fn default_true() -> bool {
    true
}
fn default_downsample_padding() -> usize {
    1
}
fn default_mid_block_scale_factor() -> f64 {
    1.0
}
fn default_sample_size() -> usize {
    64
}

impl UNetArchitecture {
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path).context("invalid UNet config")
    }

    /// Square output resolution in pixels.
    pub fn image_size(&self) -> usize {
        self.sample_size * VAE_SCALE_FACTOR
    }

    pub fn to_candle(&self) -> Result<UNet2DConditionModelConfig> {
        ensure!(
            self.in_channels == LATENT_CHANNELS && self.out_channels == LATENT_CHANNELS,
            "UNet must map {LATENT_CHANNELS} latent channels to {LATENT_CHANNELS}, config has {} -> {}",
            self.in_channels,
            self.out_channels
        );
        let n = self.block_out_channels.len();
        ensure!(n > 0, "block_out_channels is empty");
        ensure!(
            self.down_block_types.len() == n,
            "down_block_types lists {} blocks but block_out_channels lists {n}",
            self.down_block_types.len()
        );
        let heads = self
            .num_attention_heads
            .as_ref()
            .unwrap_or(&self.attention_head_dim)
            .resolve(n, "attention_head_dim")?;
        let depth = self
            .transformer_layers_per_block
            .resolve(n, "transformer_layers_per_block")?;

        let blocks = self
            .down_block_types
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let use_cross_attn = match kind.as_str() {
                    "CrossAttnDownBlock2D" => Some(depth[i]),
                    "DownBlock2D" => None,
                    other => bail!("unsupported down block type {other}"),
                };
                Ok(BlockConfig {
                    out_channels: self.block_out_channels[i],
                    use_cross_attn,
                    attention_head_dim: heads[i],
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(UNet2DConditionModelConfig {
            center_input_sample: self.center_input_sample,
            flip_sin_to_cos: self.flip_sin_to_cos,
            freq_shift: self.freq_shift,
            blocks,
            layers_per_block: self.layers_per_block,
            downsample_padding: self.downsample_padding,
            mid_block_scale_factor: self.mid_block_scale_factor,
            norm_num_groups: self.norm_num_groups,
            norm_eps: self.norm_eps,
            cross_attention_dim: self.cross_attention_dim,
            sliced_attention_size: None,
            use_linear_projection: self.use_linear_projection,
        })
    }

    /// Checks the input and output convolutions of `weights` against this config
    /// before anything heavy is loaded.
    pub fn verify_weights(&self, weights: &Path) -> Result<()> {
        let tensors = unsafe { candle_core::safetensors::MmapedSafetensors::new(weights) }
            .with_context(|| format!("failed to open UNet weights {}", weights.display()))?;
        let first = self.block_out_channels.first().copied().unwrap_or_default();
        let expected = [
            ("conv_in.weight", [first, self.in_channels, 3, 3]),
            ("conv_out.weight", [self.out_channels, first, 3, 3]),
        ];
        for (name, shape) in expected {
            let view = tensors
                .get(name)
                .with_context(|| format!("UNet weights have no tensor {name}"))?;
            ensure!(
                view.shape() == shape,
                "UNet weights do not match the config: {name} has shape {:?}, expected {:?}",
                view.shape(),
                shape
            );
        }
        Ok(())
    }
}
