//! Document store backed by a local directory tree.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use stmtflow_core::models::UploadReceipt;
use stmtflow_core::{DocumentStore, ServiceError};

const META_SUFFIX: &str = ".meta.json";

/// Folders are directories under `root`; metadata lives in `<file>.meta.json`.
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    /// Open the store, creating `root` when missing.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a store-relative path, refusing anything that leaves the root.
    fn resolve(&self, relative: &str) -> Result<PathBuf, ServiceError> {
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ServiceError::InvalidResponse(format!(
                "path outside the store: {}",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn folder_exists(&self, folder_path: &str) -> Result<bool, ServiceError> {
        let path = self.resolve(folder_path)?;
        Ok(tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false))
    }

    async fn upload(&self, local_path: &Path, folder_path: &str) -> Result<UploadReceipt, ServiceError> {
        let file_name = local_path
            .file_name()
            .ok_or_else(|| ServiceError::InvalidResponse(format!("not a file: {}", local_path.display())))?
            .to_string_lossy()
            .into_owned();

        let folder = self.resolve(folder_path)?;
        tokio::fs::create_dir_all(&folder).await?;
        let target = folder.join(&file_name);
        tokio::fs::copy(local_path, &target).await?;
        debug!("Stored {} at {}", file_name, target.display());

        Ok(UploadReceipt {
            store_id: "local".to_string(),
            drive_id: self.root.display().to_string(),
            item_id: format!("{}/{}", folder_path, file_name),
            url: format!("file://{}", target.display()),
        })
    }

    async fn update_metadata(
        &self,
        item_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<bool, ServiceError> {
        let item = self.resolve(item_id)?;
        if tokio::fs::metadata(&item).await.is_err() {
            return Err(ServiceError::NotFound(item_id.to_string()));
        }

        let mut meta_name = item.as_os_str().to_owned();
        meta_name.push(META_SUFFIX);
        let meta_path = PathBuf::from(meta_name);

        let mut merged: BTreeMap<String, String> = match tokio::fs::read_to_string(&meta_path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };
        merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));

        let content = serde_json::to_string_pretty(&merged)
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        tokio::fs::write(&meta_path, content).await?;
        Ok(true)
    }
}
