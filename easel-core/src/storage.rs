use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};

/// Flat directory of generated PNGs. There is no index or sidecar metadata.
#[derive(Clone, Debug)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Opens the output directory, creating it when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `image` as `<dir>/<filename>`, replacing any previous file of that name.
    ///
    /// The PNG is written to a hidden temporary file first and renamed into place, so
    /// the final path only ever holds a complete image.
    pub fn save(&self, filename: &str, image: &DynamicImage) -> Result<PathBuf> {
        let path = self.dir.join(filename);
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".png.tmp")
            .tempfile_in(&self.dir)
            .with_context(|| format!("failed to create temporary file in {}", self.dir.display()))?;
        image
            .write_to(&mut tmp, ImageFormat::Png)
            .with_context(|| format!("failed to encode {filename}"))?;
        tmp.flush()?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("failed to sync {filename}"))?;
        tmp.persist(&path)
            .with_context(|| format!("failed to move image into {}", path.display()))?;
        Ok(path)
    }
}
