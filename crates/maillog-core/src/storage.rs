//! Content store for attachment files.
//!
//! Attachment rows only hold a path; the bytes live in a [`ContentStore`].
//! Saving never overwrites: if the requested path is taken, a numeric
//! suffix is added before the extension and the path actually used is
//! returned.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::{Error, Result};

/// Storage backend for attachment content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores `content` at (an available variant of) `path`.
    ///
    /// Returns the path the content was stored under.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is unsafe or the write fails.
    async fn save(&self, path: &str, content: &[u8]) -> Result<String>;

    /// Reads stored content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if nothing is stored at `path`.
    async fn open(&self, path: &str) -> Result<Vec<u8>>;

    /// Deletes stored content. Deleting a missing path is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is unsafe or the delete fails.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Rejects empty, absolute and parent-escaping paths.
fn validate(path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    if path.is_empty() {
        return Err(Error::Storage("empty path".to_string()));
    }

    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Storage(format!("path escapes storage root: {path}")));
            }
        }
    }

    Ok(relative.to_path_buf())
}

/// Returns `base` with `_n` inserted before the extension.
fn candidate(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        return base.to_string();
    }

    let (dir, file) = base
        .rsplit_once('/')
        .map_or(("", base), |(dir, file)| (dir, file));
    let (stem, ext) = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file, None),
    };

    let renamed = ext.map_or_else(
        || format!("{stem}_{attempt}"),
        |ext| format!("{stem}_{attempt}.{ext}"),
    );

    if dir.is_empty() {
        renamed
    } else {
        format!("{dir}/{renamed}")
    }
}

/// Stores content as files below a root directory.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    /// Creates a store rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ContentStore for FileSystemStorage {
    async fn save(&self, path: &str, content: &[u8]) -> Result<String> {
        validate(path)?;

        for attempt in 0.. {
            let name = candidate(path, attempt);
            let full = self.root.join(&name);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&full)
                .await;

            match file {
                Ok(mut file) => {
                    use tokio::io::AsyncWriteExt;
                    file.write_all(content).await?;
                    file.flush().await?;
                    debug!(path = %full.display(), bytes = content.len(), "Stored attachment content");
                    return Ok(name);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Storage(format!("no available name for {path}")))
    }

    async fn open(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.root.join(validate(path)?);
        match tokio::fs::read(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("stored file {path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.root.join(validate(path)?);
        match tokio::fs::remove_file(&full).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// In-memory content store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryStorage {
    async fn save(&self, path: &str, content: &[u8]) -> Result<String> {
        validate(path)?;
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);

        let name = (0..)
            .map(|attempt| candidate(path, attempt))
            .find(|name| !files.contains_key(name))
            .ok_or_else(|| Error::Storage(format!("no available name for {path}")))?;

        files.insert(name.clone(), content.to_vec());
        Ok(name)
    }

    async fn open(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("stored file {path}")))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        Ok(())
    }
}
