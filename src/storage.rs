use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::fs;

/// Binary store for uploaded files, addressed by a relative key.
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> Result<()>;

    async fn list_keys(&self) -> Result<Vec<String>>;
}

pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create upload directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        {
            bail!("invalid storage key '{key}'");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create storage directory")?;
        }
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow!(err).context(format!("failed to delete {}", path.display()))),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to list {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Key for a freshly uploaded document: `documents/<company>/<document>.pdf`.
pub fn document_key(company_id: uuid::Uuid, document_id: uuid::Uuid) -> String {
    format!("documents/{company_id}/{document_id}.pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_reads_and_deletes_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).await.unwrap();

        storage
            .put_object("documents/a/b.pdf", b"%PDF-1.7".to_vec())
            .await
            .unwrap();
        assert_eq!(
            storage.get_object("documents/a/b.pdf").await.unwrap(),
            b"%PDF-1.7"
        );
        assert_eq!(storage.list_keys().await.unwrap(), vec!["documents/a/b.pdf"]);

        storage.delete_object("documents/a/b.pdf").await.unwrap();
        assert!(storage.get_object("documents/a/b.pdf").await.is_err());
        storage.delete_object("documents/a/b.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn refuses_keys_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).await.unwrap();

        for key in ["../outside.pdf", "/etc/passwd", "", "a/../../b"] {
            assert!(storage.put_object(key, Vec::new()).await.is_err(), "{key}");
        }
    }

    #[test]
    fn document_keys_are_grouped_by_company() {
        let company = uuid::Uuid::nil();
        let document = uuid::Uuid::nil();
        assert_eq!(
            document_key(company, document),
            format!("documents/{company}/{document}.pdf")
        );
    }
}
