//! Avatar storage on local disk, one file per image id.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Manages the `characters/` directory of avatar images.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).context("Failed to create characters directory")?;
        }
        Ok(())
    }

    /// Location of the avatar for `image_id`. Pure; the file may not exist.
    pub fn image_path(&self, image_id: i64) -> PathBuf {
        self.dir.join(format!("{}.png", image_id))
    }

    pub fn has_image(&self, image_id: i64) -> bool {
        self.image_path(image_id).is_file()
    }

    /// Copy `source` into the slot for `image_id`, replacing any existing file.
    pub fn copy_image(&self, source: &Path, image_id: i64) -> Result<PathBuf> {
        self.ensure_dir()?;
        let dest = self.image_path(image_id);
        fs::copy(source, &dest).with_context(|| {
            format!("Failed to copy avatar {} to {}", source.display(), dest.display())
        })?;
        Ok(dest)
    }

    /// Remove the avatar for `image_id`. A missing file is not an error.
    pub fn delete_image(&self, image_id: i64) -> Result<()> {
        match fs::remove_file(self.image_path(image_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to delete avatar"),
        }
    }
}
