//! Local asset storage.
//!
//! Uploads live under `<root>/uploads`, annotated output under
//! `<root>/processed`. References handed to clients are bare file names;
//! anything that could escape those directories is rejected.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crowdmon_media::AssetFormat;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    uploads: PathBuf,
    processed: PathBuf,
}

impl LocalStorage {
    /// Open (and create if needed) the storage directories under `root`.
    pub async fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let storage = Self {
            uploads: root.join("uploads"),
            processed: root.join("processed"),
        };
        tokio::fs::create_dir_all(&storage.uploads).await?;
        tokio::fs::create_dir_all(&storage.processed).await?;
        Ok(storage)
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed
    }

    /// Whether `name` is a plain file name we could have issued.
    pub fn is_valid_ref(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 128
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    }

    /// Persist an uploaded asset and return its reference.
    pub async fn save_upload(&self, bytes: &[u8], format: &AssetFormat) -> io::Result<String> {
        let asset_ref = format!("{}.{}", Uuid::new_v4(), format.extension);
        let path = self.uploads.join(&asset_ref);
        tokio::fs::write(&path, bytes).await?;
        debug!(asset_ref = %asset_ref, size = bytes.len(), "Stored upload");
        Ok(asset_ref)
    }

    /// Path of a stored upload, if the reference is valid and present.
    pub fn upload_path(&self, asset_ref: &str) -> Option<PathBuf> {
        Self::resolve(&self.uploads, asset_ref)
    }

    /// Path of an annotated output, if the reference is valid and present.
    pub fn output_path(&self, output_ref: &str) -> Option<PathBuf> {
        Self::resolve(&self.processed, output_ref)
    }

    fn resolve(dir: &Path, name: &str) -> Option<PathBuf> {
        if !Self::is_valid_ref(name) {
            return None;
        }
        let path = dir.join(name);
        path.is_file().then_some(path)
    }

    /// Remove an upload that will never be processed.
    pub async fn remove_upload(&self, asset_ref: &str) {
        let Some(path) = self.upload_path(asset_ref) else {
            return;
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(asset_ref, error = %e, "Failed to remove rejected upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdmon_media::sniff_asset;

    #[test]
    fn test_valid_refs() {
        assert!(LocalStorage::is_valid_ref("3f2a.mp4"));
        assert!(LocalStorage::is_valid_ref("job_1_annotated.png"));
        assert!(!LocalStorage::is_valid_ref(""));
        assert!(!LocalStorage::is_valid_ref("../secret.png"));
        assert!(!LocalStorage::is_valid_ref("a/b.png"));
        assert!(!LocalStorage::is_valid_ref("/etc/passwd"));
        assert!(!LocalStorage::is_valid_ref(".hidden"));
    }

    #[tokio::test]
    async fn test_save_and_remove_upload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let format = sniff_asset(&png, None).unwrap();
        let asset_ref = storage.save_upload(&png, &format).await.unwrap();

        assert!(asset_ref.ends_with(".png"));
        let path = storage.upload_path(&asset_ref).unwrap();
        assert!(path.starts_with(storage.uploads_dir()));

        storage.remove_upload(&asset_ref).await;
        assert!(storage.upload_path(&asset_ref).is_none());
        assert!(storage.output_path("missing.png").is_none());
    }
}
