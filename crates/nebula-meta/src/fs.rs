//! Filesystem seam for config fetching.
//!
//! The loader only needs three operations; object stores (s3) are an
//! injected implementation of the same trait, keeping the AWS surface out
//! of the control plane. The local backend is the only one implemented
//! here.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use nebula_common::NebulaResult;

/// A parsed storage URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    /// Scheme, `local` when none is given.
    pub scheme: String,
    /// Bucket or host component; empty for local paths.
    pub host: String,
    /// Path component.
    pub path: String,
}

/// Parses `scheme://host/path` or a bare local path.
#[must_use]
pub fn parse_uri(raw: &str) -> Uri {
    if let Some((scheme, rest)) = raw.split_once("://") {
        let (host, path) = match rest.split_once('/') {
            Some((host, path)) => (host.to_string(), format!("/{path}")),
            None => (rest.to_string(), String::new()),
        };
        return Uri {
            scheme: scheme.to_string(),
            host,
            path,
        };
    }
    // `local:relative/path` is accepted for symmetry with the scheme form.
    if let Some(rest) = raw.strip_prefix("local:") {
        return Uri {
            scheme: "local".to_string(),
            host: String::new(),
            path: rest.to_string(),
        };
    }
    Uri {
        scheme: "local".to_string(),
        host: String::new(),
        path: raw.to_string(),
    }
}

/// Modification marker and size of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Size in bytes.
    pub size: u64,
    /// Modification marker (nanoseconds since the unix epoch).
    pub mtime: u128,
}

impl FileInfo {
    /// Signature for change detection: modification marker plus size.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}_{}", self.mtime, self.size)
    }
}

/// Minimal filesystem operations the config loader needs.
pub trait FileSystem: Send + Sync {
    /// Stats a file.
    fn info(&self, path: &str) -> NebulaResult<FileInfo>;

    /// Reads a whole file.
    fn read(&self, path: &str) -> NebulaResult<Vec<u8>>;

    /// Copies a file to a temporary local path and returns it.
    ///
    /// The caller owns the copy and is responsible for removing it.
    fn copy(&self, path: &str) -> NebulaResult<PathBuf>;
}

/// The local-disk backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn info(&self, path: &str) -> NebulaResult<FileInfo> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(FileInfo {
            size: meta.len(),
            mtime,
        })
    }

    fn read(&self, path: &str) -> NebulaResult<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn copy(&self, path: &str) -> NebulaResult<PathBuf> {
        // Already local; hand back the same path without copying.
        Ok(Path::new(path).to_path_buf())
    }
}
