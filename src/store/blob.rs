use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BlobStore, StoreResult};

/// Caminho de um arquivo de pedido: `{configuração}/{número}.{extensão}`.
pub fn blob_path(configuration_name: &str, number: impl std::fmt::Display, extension: &str) -> String {
    let folder: String = configuration_name
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{folder}/{number}.{extension}")
}

/// Nome do arquivo dentro do caminho, usado nos envios multipart.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn invalid_path(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid blob path `{path}`"))
}

/// Arquivos no sistema de arquivos local, sob `root`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(invalid_path(path));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(path)?).await?)
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Arquivos em memória.
#[derive(Default)]
pub struct MemoryBlobStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caminhos gravados, em ordem.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.files.lock().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()).into())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.files.lock().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_layout() {
        assert_eq!(blob_path("loja", 1001, "xml"), "loja/1001.xml");
        assert_eq!(blob_path("a/b", 7, "zpl"), "a_b/7.zpl");
        assert_eq!(file_name("loja/1001.xml"), "1001.xml");
    }

    #[tokio::test]
    async fn fs_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());

        blobs.put("loja/1.pdf", b"first".to_vec()).await.unwrap();
        blobs.put("loja/1.pdf", b"second".to_vec()).await.unwrap();
        assert_eq!(blobs.get("loja/1.pdf").await.unwrap(), b"second");
        assert!(dir.path().join("loja").join("1.pdf").exists());
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        assert!(blobs.put("../outside.xml", Vec::new()).await.is_err());
        assert!(blobs.put("/etc/passwd", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        blobs.delete("loja/none.xml").await.unwrap();

        let memory = MemoryBlobStore::new();
        memory.put("a/1.xml", b"x".to_vec()).await.unwrap();
        memory.delete("a/1.xml").await.unwrap();
        assert!(memory.get("a/1.xml").await.is_err());
    }
}
