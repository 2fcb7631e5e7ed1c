//! On-disk snapshot format and atomic persistence
//!
//! The cache file is a self-describing record; the bundled seed shipped with
//! the application is a bare endpoint array. Writes go through a temp file in
//! the target directory followed by a rename, so a crash mid-write can never
//! leave a partial file behind.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use veilnet_domain::ApiEndpoint;

/// Errors raised by address cache I/O. All of them are recoverable at
/// bootstrap via the disk -> bundle -> default fallback chain.
#[derive(Debug, Error)]
pub enum AddressCacheError {
    #[error("failed to read the address cache file")]
    ReadCache(#[source] std::io::Error),

    #[error("failed to decode the address cache file")]
    DecodeCache(#[source] serde_json::Error),

    #[error("failed to read the bundled endpoint seed")]
    ReadBundle(#[source] std::io::Error),

    #[error("failed to decode the bundled endpoint seed")]
    DecodeBundle(#[source] serde_json::Error),

    #[error("failed to encode the address cache")]
    EncodeCache(#[source] serde_json::Error),

    #[error("failed to write the address cache file")]
    WriteCache(#[source] std::io::Error),

    #[error("the endpoint list must not be empty")]
    EmptyAddressList,
}

/// The persisted snapshot record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredEndpoints {
    pub updated_at: DateTime<Utc>,
    pub endpoints: Vec<ApiEndpoint>,
}

/// Reads and decodes the cache file.
pub(crate) fn load(path: &Path) -> Result<StoredEndpoints, AddressCacheError> {
    let contents = fs::read(path).map_err(AddressCacheError::ReadCache)?;
    serde_json::from_slice(&contents).map_err(AddressCacheError::DecodeCache)
}

/// Atomically replaces the cache file with the given snapshot.
pub(crate) fn store(path: &Path, snapshot: &StoredEndpoints) -> Result<(), AddressCacheError> {
    let contents = serde_json::to_vec_pretty(snapshot).map_err(AddressCacheError::EncodeCache)?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(AddressCacheError::WriteCache)?;

    let mut file = NamedTempFile::new_in(parent).map_err(AddressCacheError::WriteCache)?;
    file.write_all(&contents).map_err(AddressCacheError::WriteCache)?;
    file.persist(path).map_err(|err| AddressCacheError::WriteCache(err.error))?;
    Ok(())
}

/// Reads the bundled seed: a bare array of endpoint records.
pub(crate) fn load_bundled(path: &Path) -> Result<Vec<ApiEndpoint>, AddressCacheError> {
    let contents = fs::read(path).map_err(AddressCacheError::ReadBundle)?;
    serde_json::from_slice(&contents).map_err(AddressCacheError::DecodeBundle)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sample_snapshot() -> StoredEndpoints {
        StoredEndpoints {
            updated_at: "2026-07-01T12:00:00Z".parse().unwrap(),
            endpoints: vec!["1.2.3.4:443".parse().unwrap(), "[2001:db8::1]:443".parse().unwrap()],
        }
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api-addresses.json");
        let snapshot = sample_snapshot();

        store(&path, &snapshot).unwrap();
        assert_eq!(load(&path).unwrap(), snapshot);
    }

    #[test]
    fn store_creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache").join("api-addresses.json");

        store(&path, &sample_snapshot()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn missing_file_reports_read_error() {
        let dir = TempDir::new().unwrap();
        let result = load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(AddressCacheError::ReadCache(_))));
    }

    #[test]
    fn garbage_reports_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api-addresses.json");
        fs::write(&path, b"not json").unwrap();

        assert!(matches!(load(&path), Err(AddressCacheError::DecodeCache(_))));
    }

    #[test]
    fn bundled_seed_is_a_bare_endpoint_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundled-endpoints.json");
        fs::write(&path, br#"[{"ip":"1.2.3.4","port":443},{"ip":"5.6.7.8","port":443}]"#).unwrap();

        let endpoints = load_bundled(&path).unwrap();
        assert_eq!(
            endpoints,
            vec!["1.2.3.4:443".parse::<ApiEndpoint>().unwrap(), "5.6.7.8:443".parse().unwrap()]
        );
    }
}
