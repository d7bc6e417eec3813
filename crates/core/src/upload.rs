//! Publishing finished episodes.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Object-store style uploader: a local file goes up under a key.
pub trait Uploader: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the location the file is now available at.
    fn upload_file(&self, local: &Path, key: &str) -> Result<String>;
}

/// Mirrors uploads into a directory, keys becoming relative paths.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    root: PathBuf,
}

impl DirectoryUploader {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

/// Keys are `/`-separated and may not escape the root.
fn key_to_relative(key: &str) -> Result<PathBuf> {
    let mut rel = PathBuf::new();
    for part in key.split('/').filter(|p| !p.is_empty()) {
        if part == "." || part == ".." {
            bail!("Invalid upload key: {}", key);
        }
        rel.push(part);
    }
    if rel.as_os_str().is_empty() {
        bail!("Empty upload key");
    }
    Ok(rel)
}

impl Uploader for DirectoryUploader {
    fn name(&self) -> &str {
        "directory"
    }

    fn upload_file(&self, local: &Path, key: &str) -> Result<String> {
        let dest = self.root.join(key_to_relative(key)?);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Copy beside the target, then rename into place.
        let partial = dest.with_extension("part");
        std::fs::copy(local, &partial)
            .with_context(|| format!("Failed to copy {} to {}", local.display(), partial.display()))?;
        std::fs::rename(&partial, &dest)
            .with_context(|| format!("Failed to move upload into place: {}", dest.display()))?;
        log::info!("Uploaded {} -> {}", local.display(), dest.display());
        Ok(dest.display().to_string())
    }
}

/// Upload every `(local, key)` pair, logging failures instead of returning
/// them. Returns how many succeeded.
pub fn upload_all(uploader: &dyn Uploader, files: &[(PathBuf, String)]) -> usize {
    let mut ok = 0;
    for (local, key) in files {
        match uploader.upload_file(local, key) {
            Ok(_) => ok += 1,
            Err(e) => log::error!("{} upload of {} failed: {:#}", uploader.name(), key, e),
        }
    }
    ok
}
