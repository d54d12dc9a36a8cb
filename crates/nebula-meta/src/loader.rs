//! Cluster config loader with signature-based change detection.

use nebula_common::{hash64, NebulaError, NebulaResult};
use tracing::{info, warn};

use crate::cluster::ClusterInfo;
use crate::config::ClusterConfigFile;
use crate::fs::{parse_uri, FileSystem, LocalFileSystem};

/// Loads `ClusterInfo` snapshots from a config URI.
///
/// `load` is called every reconciliation tick; it compares the file's
/// signature with the previously retained one and only parses on change.
/// Remote (`s3`) files are copied to a temporary local path and signed by
/// content, since the copy has a fresh name and timestamp; local files are
/// signed by modification marker plus size.
pub struct ConfigLoader {
    local: LocalFileSystem,
    remote: Option<Box<dyn FileSystem>>,
    last_signature: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader that can resolve local paths only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            local: LocalFileSystem,
            remote: None,
            last_signature: None,
        }
    }

    /// Creates a loader with an object-store backend for `s3://` URIs.
    #[must_use]
    pub fn with_remote(remote: Box<dyn FileSystem>) -> Self {
        Self {
            local: LocalFileSystem,
            remote: Some(remote),
            last_signature: None,
        }
    }

    /// The signature of the last successfully loaded config.
    #[must_use]
    pub fn last_signature(&self) -> Option<&str> {
        self.last_signature.as_deref()
    }

    /// Loads the config at `uri` if it changed since the last call.
    ///
    /// Returns `Ok(None)` when the signature is unchanged. Fetch failures
    /// surface as `ConfigUnavailable` and parse failures as
    /// `ConfigInvalid`; in both cases the retained signature is left
    /// untouched so the caller keeps its previous snapshot and the next
    /// tick retries.
    pub fn load(&mut self, uri: &str) -> NebulaResult<Option<ClusterInfo>> {
        let parsed = parse_uri(uri);
        let (bytes, signature) = match parsed.scheme.as_str() {
            "s3" => self.fetch_remote(uri, &parsed.path)?,
            "local" => {
                let info = self.local.info(&parsed.path).map_err(|e| unavailable(uri, &e))?;
                let signature = info.signature();
                if self.last_signature.as_deref() == Some(signature.as_str()) {
                    return Ok(None);
                }
                let bytes = self.local.read(&parsed.path).map_err(|e| unavailable(uri, &e))?;
                (bytes, signature)
            }
            other => {
                return Err(NebulaError::ConfigUnavailable {
                    uri: uri.to_string(),
                    reason: format!("unrecognised scheme: {other}"),
                })
            }
        };

        if self.last_signature.as_deref() == Some(signature.as_str()) {
            return Ok(None);
        }

        let file = ClusterConfigFile::parse(&bytes).map_err(|e| NebulaError::ConfigInvalid {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        let info = ClusterInfo::from_config(uri, file)?;

        info!(
            uri,
            version = info.version(),
            nodes = info.nodes().len(),
            tables = info.tables().len(),
            "loaded cluster config"
        );
        self.last_signature = Some(signature);
        Ok(Some(info))
    }

    /// Copies the remote file locally, reads it and signs it by content.
    fn fetch_remote(&self, uri: &str, path: &str) -> NebulaResult<(Vec<u8>, String)> {
        let remote = self.remote.as_ref().ok_or_else(|| NebulaError::ConfigUnavailable {
            uri: uri.to_string(),
            reason: "no object-store filesystem configured".to_string(),
        })?;

        let copy = remote.copy(path).map_err(|e| unavailable(uri, &e))?;
        let local_path = copy.to_string_lossy().to_string();
        let result = self.local.read(&local_path).map_err(|e| unavailable(uri, &e));

        // The copy has a throwaway name; remove it regardless of outcome.
        if let Err(e) = std::fs::remove_file(&copy) {
            warn!(path = %local_path, error = %e, "failed to remove temporary config copy");
        }

        let bytes = result?;
        let signature = format!("{}_{}", bytes.len(), hash64(&bytes));
        Ok((bytes, signature))
    }
}

fn unavailable(uri: &str, err: &NebulaError) -> NebulaError {
    NebulaError::ConfigUnavailable {
        uri: uri.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    const CONF_V1: &str = r#"
version: "1"
nodes:
  - { host: a, port: 9199, role: node }
tables: []
"#;

    const CONF_V2: &str = r#"
version: "2"
nodes:
  - { host: a, port: 9199, role: node }
  - { host: b, port: 9199, role: node }
tables: []
"#;

    #[test]
    fn test_local_change_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yml");
        std::fs::write(&path, CONF_V1).unwrap();
        let uri = path.to_str().unwrap().to_string();

        let mut loader = ConfigLoader::new();
        let first = loader.load(&uri).unwrap();
        assert_eq!(first.unwrap().version(), "1");

        // Unchanged file: no new snapshot.
        assert!(loader.load(&uri).unwrap().is_none());

        std::fs::write(&path, CONF_V2).unwrap();
        let second = loader.load(&uri).unwrap().unwrap();
        assert_eq!(second.version(), "2");
        assert_eq!(second.nodes().len(), 2);
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let mut loader = ConfigLoader::new();
        let err = loader.load("/nonexistent/cluster.yml").unwrap_err();
        assert_eq!(err.code(), nebula_common::ErrorCode::ConfigUnavailable);
        assert!(loader.last_signature().is_none());
    }

    #[test]
    fn test_invalid_yaml_keeps_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yml");
        std::fs::write(&path, CONF_V1).unwrap();
        let uri = path.to_str().unwrap().to_string();

        let mut loader = ConfigLoader::new();
        loader.load(&uri).unwrap();
        let retained = loader.last_signature().unwrap().to_string();

        std::fs::write(&path, "nodes: [broken").unwrap();
        let err = loader.load(&uri).unwrap_err();
        assert_eq!(err.code(), nebula_common::ErrorCode::ConfigInvalid);
        // Previous snapshot's signature survives; the next good write loads.
        assert_eq!(loader.last_signature(), Some(retained.as_str()));

        std::fs::write(&path, CONF_V2).unwrap();
        assert_eq!(loader.load(&uri).unwrap().unwrap().version(), "2");
    }

    /// Object-store stand-in that copies a fixed document to a temp file.
    struct FakeStore {
        payload: &'static str,
    }

    impl FileSystem for FakeStore {
        fn info(&self, _path: &str) -> NebulaResult<crate::fs::FileInfo> {
            Ok(crate::fs::FileInfo {
                size: self.payload.len() as u64,
                mtime: 0,
            })
        }

        fn read(&self, _path: &str) -> NebulaResult<Vec<u8>> {
            Ok(self.payload.as_bytes().to_vec())
        }

        fn copy(&self, _path: &str) -> NebulaResult<PathBuf> {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(self.payload.as_bytes()).unwrap();
            let (_, path) = file.keep().unwrap();
            Ok(path)
        }
    }

    #[test]
    fn test_s3_signed_by_content() {
        let mut loader = ConfigLoader::with_remote(Box::new(FakeStore { payload: CONF_V1 }));
        let uri = "s3://bucket/configs/cluster.yml";

        let first = loader.load(uri).unwrap();
        assert_eq!(first.unwrap().version(), "1");
        let sign = loader.last_signature().unwrap().to_string();
        assert!(sign.starts_with(&format!("{}_", CONF_V1.len())));

        // Same content copied to a different temp path: same signature,
        // no reload.
        assert!(loader.load(uri).unwrap().is_none());
    }

    #[test]
    fn test_s3_without_backend_is_unavailable() {
        let mut loader = ConfigLoader::new();
        let err = loader.load("s3://bucket/cluster.yml").unwrap_err();
        assert_eq!(err.code(), nebula_common::ErrorCode::ConfigUnavailable);
    }
}
