use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// Locations of the fine-tuned denoising network that replaces the base bundle's UNet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelPaths {
    /// diffusers `config.json` describing the UNet architecture.
    pub unet_config: PathBuf,
    /// `.safetensors` weights matching `unet_config`.
    pub unet_weights: PathBuf,
}

impl ModelPaths {
    pub fn new(unet_config: impl Into<PathBuf>, unet_weights: impl Into<PathBuf>) -> Self {
        Self {
            unet_config: unet_config.into(),
            unet_weights: unet_weights.into(),
        }
    }

    /// Fails unless both override artifacts are existing regular files.
    pub fn validate(&self) -> Result<()> {
        check_file("UNet config", &self.unet_config)?;
        check_file("UNet weights", &self.unet_weights)
    }
}

fn check_file(what: &str, path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => bail!("{what} path {} is not a regular file", path.display()),
        Err(e) => bail!("{what} not found at {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        let weights = dir.path().join("diffusion_pytorch_model.safetensors");
        std::fs::write(&config, "{}").unwrap();
        std::fs::write(&weights, b"").unwrap();
        ModelPaths::new(config, weights).validate().unwrap();
    }

    #[test]
    fn reports_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        std::fs::write(&config, "{}").unwrap();
        let err = ModelPaths::new(config, dir.path().join("missing.safetensors"))
            .validate()
            .unwrap_err();
        assert!(err.to_string().starts_with("UNet weights not found"), "{err}");
    }

    #[test]
    fn rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelPaths::new(dir.path(), dir.path())
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("not a regular file"), "{err}");
    }
}
