use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound for a card image.
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// URL prefix under which stored images are served.
pub const URL_PREFIX: &str = "/uploads/";

/// Card images on local disk, one flat file per upload.
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Image upload directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write an image under a generated name and return its public URL.
    pub async fn save(&self, original_name: Option<&str>, content_type: &str, data: &[u8]) -> Result<String> {
        let name = format!(
            "{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            Uuid::new_v4().simple(),
            extension_for(original_name, content_type)
        );
        fs::write(self.dir.join(&name), data).await?;
        Ok(format!("{}{}", URL_PREFIX, name))
    }

    /// Remove the file behind a public URL. Missing files are logged, not
    /// reported.
    pub async fn delete(&self, url: &str) {
        let Some(path) = self.path_for(url) else {
            warn!("Refusing to delete image outside upload dir: {}", url);
            return;
        };
        if let Err(e) = fs::remove_file(&path).await {
            warn!("Failed to delete image {}: {}", path.display(), e);
        }
    }

    /// Local path of a stored image, if the URL names a plain file in the
    /// upload directory.
    pub fn path_for(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(URL_PREFIX)?;
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.dir.join(name))
    }
}

/// Extension from the client's file name, else from the MIME subtype.
fn extension_for(original_name: Option<&str>, content_type: &str) -> String {
    let from_name = original_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str());
    let from_mime = content_type.strip_prefix("image/");

    [from_name, from_mime]
        .into_iter()
        .flatten()
        .map(str::to_ascii_lowercase)
        .find(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "img".to_string())
}

pub fn is_image(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_a_safe_extension() {
        assert_eq!(extension_for(Some("sofa.JPG"), "image/jpeg"), "jpg");
        assert_eq!(extension_for(None, "image/png"), "png");
        assert_eq!(extension_for(Some("noext"), "image/svg+xml"), "img");
        assert_eq!(extension_for(Some("evil.p/hp"), "image/webp"), "webp");
    }

    #[tokio::test]
    async fn save_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path().join("uploads")).await.unwrap();

        let url = store.save(Some("chair.png"), "image/png", b"fake png").await.unwrap();
        assert!(url.starts_with(URL_PREFIX));
        assert!(url.ends_with(".png"));

        let path = store.path_for(&url).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"fake png");

        store.delete(&url).await;
        assert!(!path.exists());

        // Second delete only logs.
        store.delete(&url).await;
    }

    #[tokio::test]
    async fn rejects_paths_outside_the_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ImageStore::new(tmp.path().to_path_buf()).await.unwrap();

        assert!(store.path_for("/uploads/../secret").is_none());
        assert!(store.path_for("/uploads/a/b.png").is_none());
        assert!(store.path_for("/elsewhere/x.png").is_none());
        assert!(store.path_for("/uploads/").is_none());
    }
}
