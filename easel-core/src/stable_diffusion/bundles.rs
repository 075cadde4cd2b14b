use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokenizers::Tokenizer;

use super::clip::ClipTextConfig;

/// Tokenizer and text encoder come from here.
pub const TEXT_ENCODER_REPO: &str = "laion/CLIP-ViT-H-14-laion2B-s32B-b79K";
/// Scheduler and VAE come from here; its UNet is replaced by the local override.
pub const BASE_PIPELINE_REPO: &str = "stabilityai/stable-diffusion-2-1-base";

pub const TEXT_ENCODER_CONFIG: &str = "config.json";
pub const TEXT_ENCODER_TOKENIZER: &str = "tokenizer.json";
pub const TEXT_ENCODER_SPECIAL_TOKENS: &str = "special_tokens_map.json";
pub const TEXT_ENCODER_WEIGHTS: &str = "model.safetensors";
pub const SCHEDULER_CONFIG: &str = "scheduler/scheduler_config.json";
pub const VAE_CONFIG: &str = "vae/config.json";
pub const VAE_WEIGHTS: &str = "vae/diffusion_pytorch_model.safetensors";

/// Pixels per latent cell for the SD 2.x autoencoder.
pub const VAE_SCALE_FACTOR: usize = 8;

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// CLIP's end-of-text marker, which `CLIPTokenizer` also pads with when the bundle
/// names no pad token.
const END_OF_TEXT: &str = "<|endoftext|>";

/// The text half of a transformers `CLIPConfig`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TextEncoderSettings {
    #[serde(alias = "text_config_dict")]
    pub text_config: ClipTextConfig,
}

/// A token in `special_tokens_map.json`: a bare string or an `AddedToken` object.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SpecialToken {
    Plain(String),
    Added { content: String },
}

impl SpecialToken {
    pub fn content(&self) -> &str {
        match self {
            SpecialToken::Plain(content) | SpecialToken::Added { content } => content,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SpecialTokens {
    #[serde(default)]
    pub pad_token: Option<SpecialToken>,
}

/// Id prompts are padded with: the bundle's declared pad token, else the tokenizer's
/// own padding token, else end-of-text.
pub fn pad_token_id(tokenizer: &Tokenizer, special: &SpecialTokens) -> Result<u32> {
    let token = special
        .pad_token
        .as_ref()
        .map(SpecialToken::content)
        .or_else(|| tokenizer.get_padding().map(|p| p.pad_token.as_str()))
        .unwrap_or(END_OF_TEXT);
    tokenizer
        .token_to_id(token)
        .with_context(|| format!("CLIP tokenizer has no padding token {token:?}"))
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct VaeSettings {
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f64,
}

fn default_scaling_factor() -> f64 {
    0.18215
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::super::clip::Activation;
    use super::*;

    // Word-level stand-in for the CLIP BPE vocabulary; id 0 is the `!` candle's SD
    // presets pad with.
    const TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"!": 0, "<|startoftext|>": 1, "<|endoftext|>": 2, "<pad>": 3, "fox": 4},
            "unk_token": "!"
        }
    }"#;

    fn tokenizer() -> Tokenizer {
        Tokenizer::from_str(TOKENIZER).unwrap()
    }

    #[test]
    fn reads_nested_text_config() {
        let raw = r#"{
            "architectures": ["CLIPModel"],
            "projection_dim": 1024,
            "text_config": {"hidden_act": "gelu", "hidden_size": 1024, "num_hidden_layers": 24},
            "vision_config": {"hidden_size": 1280}
        }"#;
        let settings: TextEncoderSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.text_config.hidden_size, 1024);
        assert_eq!(settings.text_config.num_hidden_layers, 24);
        assert_eq!(settings.text_config.hidden_act, Activation::Gelu);
        assert_eq!(settings.text_config.max_position_embeddings, 77);
    }

    #[test]
    fn accepts_legacy_text_config_dict() {
        let raw = r#"{"text_config_dict": {"hidden_size": 768, "max_position_embeddings": 77}}"#;
        let settings: TextEncoderSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.text_config.hidden_size, 768);
    }

    #[test]
    fn vae_scale_defaults_for_old_configs() {
        let settings: VaeSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.scaling_factor, 0.18215);
        let settings: VaeSettings = serde_json::from_str(r#"{"scaling_factor": 0.13025}"#).unwrap();
        assert_eq!(settings.scaling_factor, 0.13025);
    }

    #[test]
    fn read_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<VaeSettings>(&path).unwrap_err();
        assert!(err.to_string().contains("config.json"), "{err}");
    }

    #[test]
    fn pads_with_the_bundles_declared_token() {
        let special: SpecialTokens = serde_json::from_str(
            r#"{
                "bos_token": {"content": "<|startoftext|>", "lstrip": false},
                "eos_token": {"content": "<|endoftext|>", "lstrip": false},
                "pad_token": "<|endoftext|>",
                "unk_token": {"content": "<|endoftext|>", "lstrip": false}
            }"#,
        )
        .unwrap();
        assert_eq!(pad_token_id(&tokenizer(), &special).unwrap(), 2);

        let special: SpecialTokens =
            serde_json::from_str(r#"{"pad_token": {"content": "<pad>", "normalized": false}}"#)
                .unwrap();
        assert_eq!(pad_token_id(&tokenizer(), &special).unwrap(), 3);
    }

    #[test]
    fn pads_with_end_of_text_when_nothing_is_declared() {
        let special: SpecialTokens = serde_json::from_str("{}").unwrap();
        assert_eq!(pad_token_id(&tokenizer(), &special).unwrap(), 2);
    }

    #[test]
    fn unknown_pad_token_is_an_error() {
        let special = SpecialTokens {
            pad_token: Some(SpecialToken::Plain("[PAD]".to_string())),
        };
        let err = pad_token_id(&tokenizer(), &special).unwrap_err();
        assert!(err.to_string().contains("[PAD]"), "{err}");
    }
}
