//! FsStore - ディレクトリを Store として使う実装
//!
//! Works against a local directory or a network mount shared by all nodes.
//! Every write lands in a temp file first. Create-if-absent then hard-links
//! the temp file into place, which fails if the target exists and is a true
//! test-and-set on local filesystems. Overwrites rename the temp file over
//! the target. Either way a reader never sees a half-written blob.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::domain::errors::{Error, Result};
use crate::domain::ids::ResultId;
use crate::ports::{CreateOutcome, Store};

const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::store_with_source(format!("create root {}", root.display()), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(Error::Config(format!("invalid store path {path:?}")));
        }
        Ok(self.root.join(relative))
    }

    /// Writes `data` to a fresh temp file next to `file` and syncs it.
    async fn write_temp(&self, file: &Path, path: &str, data: &[u8]) -> Result<PathBuf> {
        let temp = file.with_file_name(format!("{TEMP_PREFIX}{}", ResultId::generate().as_ulid()));
        let written = async {
            let mut handle = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp)
                .await?;
            handle.write_all(data).await?;
            handle.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::store_with_source(format!("write {path}"), e));
        }
        Ok(temp)
    }

    async fn ensure_parent(&self, file: &Path, path: &str) -> Result<()> {
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::store_with_source(format!("mkdir for {path}"), e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FsStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let file = self.resolve(path)?;
        tokio::fs::try_exists(&file)
            .await
            .map_err(|e| Error::store_with_source(format!("exists {path}"), e))
    }

    async fn read_all(&self, path: &str) -> Result<Bytes> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Err(Error::NotFound(path.to_string())),
            Err(e) => Err(Error::store_with_source(format!("read {path}"), e)),
        }
    }

    async fn write_create_if_absent(&self, path: &str, data: Bytes) -> Result<CreateOutcome> {
        let file = self.resolve(path)?;
        self.ensure_parent(&file, path).await?;
        let temp = self.write_temp(&file, path, &data).await?;
        // link は既存の target を上書きしない
        let linked = tokio::fs::hard_link(&temp, &file).await;
        let _ = tokio::fs::remove_file(&temp).await;
        match linked {
            Ok(()) => Ok(CreateOutcome::Created),
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(Error::store_with_source(format!("create {path}"), e)),
        }
    }

    async fn write_overwrite(&self, path: &str, data: Bytes) -> Result<()> {
        let file = self.resolve(path)?;
        self.ensure_parent(&file, path).await?;
        let temp = self.write_temp(&file, path, &data).await?;
        if let Err(e) = tokio::fs::rename(&temp, &file).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::store_with_source(format!("rename into {path}"), e));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::store_with_source(format!("delete {path}"), e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // prefix の最後の '/' までがディレクトリ
        let dir = match prefix.rfind('/') {
            Some(idx) => self.resolve(&prefix[..idx])?,
            None => self.root.clone(),
        };
        let root = self.root.clone();
        let prefix_owned = prefix.to_string();
        let mut found = tokio::task::spawn_blocking(move || walk(&root, &dir))
            .await
            .map_err(|e| Error::store_with_source(format!("list {prefix}"), e))?
            .map_err(|e| Error::store_with_source(format!("list {prefix}"), e))?;
        found.retain(|p| p.starts_with(&prefix_owned));
        found.sort();
        Ok(found)
    }
}

/// Recursively collects files under `dir` as `/`-joined paths relative to
/// `root`. A missing directory yields nothing.
fn walk(root: &Path, dir: &Path) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // 無い dir や walk 中に消えた entry
            Err(e) if e.io_error().is_some_and(|io| io.kind() == IoErrorKind::NotFound) => continue,
            Err(e) => return Err(e.into()),
        };
        if !entry.file_type().is_file()
            || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
        {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            let joined: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(joined.join("/"));
        }
    }
    Ok(out)
}
