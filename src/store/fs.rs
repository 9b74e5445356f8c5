//! Filesystem-backed [`ObjectStore`].
//!
//! Each namespace is a directory; an object key `a/b/c.md` maps to the file
//! `<root>/a/b/c.md`. Unlike blob services, filesystems interpret `..`, so
//! this backend re-derives the namespace guarantee explicitly:
//!
//! 1. Keys are validated component by component: empty, `.` and `..`
//!    components, absolute keys, backslashes and NUL bytes are rejected.
//! 2. The resolved path (after canonicalizing whatever exists of it) must be
//!    a descendant of the canonical root. This also stops symlinks that point
//!    outside the namespace.
//!
//! A key that fails either check reads as absent and cannot be written.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use walkdir::WalkDir;

use super::{ObjectMeta, ObjectStore};

pub struct FsObjectStore {
    /// Canonical namespace root.
    root: PathBuf,
}

impl FsObjectStore {
    /// Open (creating if needed) a namespace rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create storage directory: {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve storage directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path inside the root, or `None` if it could escape.
    fn resolve(&self, key: &str) -> Option<PathBuf> {
        if !is_safe_key(key) {
            return None;
        }
        let candidate = self.root.join(key);
        let anchor = deepest_existing(&candidate)?;
        let canonical = anchor.canonicalize().ok()?;
        if canonical.starts_with(&self.root) {
            Some(candidate)
        } else {
            None
        }
    }
}

/// Structural key check; see the module docs.
pub fn is_safe_key(key: &str) -> bool {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return false;
    }
    key.split('/')
        .all(|part| !part.is_empty() && part != "." && part != "..")
}

fn deepest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

fn to_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // Walk only the directory part of the prefix when it is a safe key.
        let start = match prefix.rfind('/') {
            Some(i) if is_safe_key(&prefix[..i]) => self.root.join(&prefix[..i]),
            _ => self.root.clone(),
        };
        match start.canonicalize() {
            Ok(canonical) if canonical.starts_with(&self.root) => {}
            _ => return Ok(Vec::new()),
        }

        let root = self.root.clone();
        let prefix = prefix.to_string();
        let mut objects = tokio::task::spawn_blocking(move || -> Result<Vec<ObjectMeta>> {
            let mut objects = Vec::new();
            for entry in WalkDir::new(&start) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(key) = to_key(&root, entry.path()) else {
                    continue;
                };
                if !key.starts_with(&prefix) {
                    continue;
                }
                let size = entry.metadata()?.len();
                objects.push(ObjectMeta { key, size });
            }
            Ok(objects)
        })
        .await
        .context("storage listing task failed")??;

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.resolve(key) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let Some(path) = self.resolve(key) else {
            return Ok(false);
        };
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn put(&self, key: &str, body: &[u8]) -> Result<()> {
        let Some(path) = self.resolve(key) else {
            bail!("invalid object key: {:?}", key);
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        // Re-check now that the parent chain exists.
        if self.resolve(key).is_none() {
            bail!("invalid object key: {:?}", key);
        }
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}
