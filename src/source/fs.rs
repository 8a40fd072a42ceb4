use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use bytes::Bytes;
use http::Method;
use tracing::debug;

use super::{non_empty_query_value, ImageSource, SourceConfig};
use crate::error::SourceError;

pub const FILE_SYSTEM_SOURCE: &str = "fs";

/// Reads images from a mounted directory, named by the `file` query parameter.
pub struct FileSystemSource {
    config: Arc<SourceConfig>,
}

impl FileSystemSource {
    pub fn new(config: Arc<SourceConfig>) -> Self {
        Self { config }
    }
}

/// Lexically normalize a path: drop `.` and resolve `..` without touching the disk.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Never climb above the root
                if !matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join `file` onto `mount` and reject anything that escapes the mount.
pub fn resolve_mount_path(mount: &Path, file: &str) -> Result<PathBuf, SourceError> {
    let mount = clean(mount);
    let joined = clean(&mount.join(file.trim_start_matches('/')));

    if !joined.starts_with(&mount) {
        return Err(SourceError::InvalidFilePath);
    }
    Ok(joined)
}

#[async_trait]
impl ImageSource for FileSystemSource {
    fn name(&self) -> &'static str {
        FILE_SYSTEM_SOURCE
    }

    fn matches(&self, request: &Request) -> bool {
        self.config.mount_path.is_some()
            && request.method() == Method::GET
            && non_empty_query_value(request, "file").is_some()
    }

    async fn get_image(&self, request: Request) -> Result<Bytes, SourceError> {
        let mount = self
            .config
            .mount_path
            .as_deref()
            .ok_or(SourceError::InvalidFilePath)?;
        let file =
            non_empty_query_value(&request, "file").ok_or(SourceError::MissingParam("file"))?;

        let path = resolve_mount_path(mount, &file)?;
        debug!(path = %path.display(), "reading image from mount");

        match tokio::fs::read(&path).await {
            Ok(buf) => Ok(Bytes::from(buf)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SourceError::FileNotFound(file)),
            Err(_) => Err(SourceError::InvalidFilePath),
        }
    }
}
