//! Datalayer file store
//!
//! Every save of a datalayer writes a new `{datalayer}_{millis}.geojson` file in
//! the map's storage directory; the datalayer row then points at the newest
//! one. Older files are the version history and get purged beyond
//! `keep_versions`. A `.gz` sibling is produced lazily for gzip-capable clients.

use crate::{DataLayerId, DataLayerVersion, MapId, Result, StorageError};
use chrono::{DateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const EXTENSION: &str = ".geojson";
const GZIP_SUFFIX: &str = ".gz";

pub struct DataLayerFiles {
    root: PathBuf,
    keep_versions: usize,
}

impl DataLayerFiles {
    pub fn new(root: impl Into<PathBuf>, keep_versions: usize) -> Self {
        Self {
            root: root.into(),
            keep_versions: keep_versions.max(1),
        }
    }

    /// Directory of a map's datalayer files, relative to the root.
    ///
    /// Maps are spread over two levels of ten buckets so that no single
    /// directory grows unbounded: map 302 lives in `datalayer/2/0/302`.
    pub fn storage_dir(map_id: MapId) -> String {
        format!(
            "datalayer/{}/{}/{}",
            map_id % 10,
            (map_id / 10) % 10,
            map_id
        )
    }

    /// Resolve a relative path below the root, refusing anything that could
    /// escape it.
    pub fn absolute(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        let safe = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || relative.is_empty() {
            return Err(StorageError::Invalid(format!("invalid path: {}", relative)));
        }
        Ok(self.root.join(path))
    }

    /// Fresh relative file name for the next version of a datalayer.
    pub async fn upload_to(&self, map_id: MapId, datalayer_id: DataLayerId) -> Result<String> {
        let dir = Self::storage_dir(map_id);
        let mut millis = Utc::now().timestamp_millis();
        // Names must sort after every existing version, even within one millisecond
        if let Some(latest) = self.versions(map_id, datalayer_id).await?.first() {
            millis = millis.max(latest.at + 1);
        }
        loop {
            let candidate = format!("{}/{}_{}{}", dir, datalayer_id, millis, EXTENSION);
            if !fs::try_exists(self.absolute(&candidate)?).await? {
                return Ok(candidate);
            }
            millis += 1;
        }
    }

    /// Store `content` as the newest version and purge the old ones.
    pub async fn write(
        &self,
        map_id: MapId,
        datalayer_id: DataLayerId,
        content: &[u8],
    ) -> Result<String> {
        let relative = self.upload_to(map_id, datalayer_id).await?;
        let path = self.absolute(&relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, content).await?;
        debug!("Wrote {} ({} bytes)", relative, content.len());
        self.purge(map_id, datalayer_id).await?;
        Ok(relative)
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.absolute(relative)?).await?)
    }

    pub async fn modified(&self, relative: &str) -> Result<DateTime<Utc>> {
        let metadata = fs::metadata(self.absolute(relative)?).await?;
        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }

    /// Relative path of the gzip sibling of `relative`, created or refreshed
    /// when missing or older than the source.
    pub async fn gzip(&self, relative: &str) -> Result<String> {
        let source = self.absolute(relative)?;
        let gz_relative = format!("{}{}", relative, GZIP_SUFFIX);
        let target = self.absolute(&gz_relative)?;

        let source_modified = fs::metadata(&source).await?.modified()?;
        match fs::metadata(&target).await {
            Ok(meta) if meta.modified()? >= source_modified => return Ok(gz_relative),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let content = fs::read(&source).await?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&content)?;
        let compressed = encoder.finish()?;
        write_atomic(&target, &compressed).await?;
        debug!("Compressed {} ({} -> {} bytes)", relative, content.len(), compressed.len());
        Ok(gz_relative)
    }

    /// Stored versions of a datalayer, newest first.
    pub async fn versions(
        &self,
        map_id: MapId,
        datalayer_id: DataLayerId,
    ) -> Result<Vec<DataLayerVersion>> {
        let dir = self.absolute(&Self::storage_dir(map_id))?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(at) = version_millis(&name, datalayer_id) else {
                continue;
            };
            let size = entry.metadata().await?.len();
            versions.push(DataLayerVersion { name, at, size });
        }
        versions.sort_by(|a, b| b.at.cmp(&a.at));
        Ok(versions)
    }

    /// Relative path of a named version, accepting only this datalayer's own
    /// version file names.
    pub fn version_path(
        &self,
        map_id: MapId,
        datalayer_id: DataLayerId,
        name: &str,
    ) -> Result<String> {
        if version_millis(name, datalayer_id).is_none() {
            return Err(StorageError::InvalidVersion(name.to_string()));
        }
        Ok(format!("{}/{}", Self::storage_dir(map_id), name))
    }

    /// Delete every version of a datalayer along with its gzip siblings.
    pub async fn remove_all(&self, map_id: MapId, datalayer_id: DataLayerId) -> Result<()> {
        let versions = self.versions(map_id, datalayer_id).await?;
        for version in &versions {
            self.remove_version(map_id, &version.name).await?;
        }
        info!(
            "Removed {} file(s) of datalayer {}",
            versions.len(),
            datalayer_id
        );
        Ok(())
    }

    async fn purge(&self, map_id: MapId, datalayer_id: DataLayerId) -> Result<()> {
        let versions = self.versions(map_id, datalayer_id).await?;
        for version in versions.iter().skip(self.keep_versions) {
            debug!("Purging old version {}", version.name);
            self.remove_version(map_id, &version.name).await?;
        }
        Ok(())
    }

    async fn remove_version(&self, map_id: MapId, name: &str) -> Result<()> {
        let relative = format!("{}/{}", Self::storage_dir(map_id), name);
        for candidate in [relative.clone(), format!("{}{}", relative, GZIP_SUFFIX)] {
            match fs::remove_file(self.absolute(&candidate)?).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove {}: {}", candidate, e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

/// Timestamp of a version file name, when it belongs to `datalayer_id`.
fn version_millis(name: &str, datalayer_id: DataLayerId) -> Option<i64> {
    let rest = name.strip_prefix(&format!("{}_", datalayer_id))?;
    let digits = rest.strip_suffix(EXTENSION)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Strong entity tag of a datalayer file's uncompressed content.
pub fn etag(content: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(content)))
}

fn strip_tag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

fn any_tag_matches(header: &str, current: &str) -> bool {
    let current = strip_tag(current);
    header
        .split(',')
        .any(|tag| strip_tag(tag) == "*" || strip_tag(tag) == current)
}

/// `If-Match` evaluation: an absent or empty header always passes.
pub fn if_match(header: Option<&str>, current: &str) -> bool {
    match header.map(str::trim) {
        None | Some("") => true,
        Some(header) => any_tag_matches(header, current),
    }
}

/// `If-None-Match` evaluation: true when the client copy is still fresh.
pub fn if_none_match(header: Option<&str>, current: &str) -> bool {
    match header.map(str::trim) {
        None | Some("") => false,
        Some(header) => any_tag_matches(header, current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn store(keep: usize) -> (TempDir, DataLayerFiles) {
        let dir = TempDir::new().unwrap();
        let files = DataLayerFiles::new(dir.path(), keep);
        (dir, files)
    }

    #[test]
    fn test_storage_dir_buckets() {
        assert_eq!(DataLayerFiles::storage_dir(302), "datalayer/2/0/302");
        assert_eq!(DataLayerFiles::storage_dir(7), "datalayer/7/0/7");
        assert_eq!(DataLayerFiles::storage_dir(1234), "datalayer/4/3/1234");
    }

    #[test]
    fn test_absolute_rejects_traversal() {
        let (_dir, files) = store(10);
        assert!(files.absolute("../etc/passwd").is_err());
        assert!(files.absolute("/etc/passwd").is_err());
        assert!(files.absolute("").is_err());
        assert!(files.absolute("datalayer/2/0/302/1_1.geojson").is_ok());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (_dir, files) = store(10);
        let path = files.write(302, 5, b"{\"type\":\"FeatureCollection\"}").await.unwrap();
        assert!(path.starts_with("datalayer/2/0/302/5_"));
        assert!(path.ends_with(".geojson"));
        assert_eq!(
            files.read(&path).await.unwrap(),
            b"{\"type\":\"FeatureCollection\"}"
        );
        assert!(files.modified(&path).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_never_reuses_a_name() {
        let (_dir, files) = store(10);
        let first = files.write(1, 1, b"one").await.unwrap();
        let second = files.write(1, 1, b"two").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(files.read(&first).await.unwrap(), b"one");
        assert_eq!(files.read(&second).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_purge_keeps_latest_versions() {
        let (_dir, files) = store(3);
        let mut paths = Vec::new();
        for i in 0..5 {
            paths.push(files.write(1, 1, format!("v{}", i).as_bytes()).await.unwrap());
        }
        let versions = files.versions(1, 1).await.unwrap();
        assert_eq!(versions.len(), 3);
        // Newest first
        assert!(paths[4].ends_with(&versions[0].name));
        assert!(versions[0].at > versions[2].at);
        assert!(files.read(&paths[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_removes_gzip_siblings() {
        let (_dir, files) = store(1);
        let first = files.write(1, 1, b"first").await.unwrap();
        let gz = files.gzip(&first).await.unwrap();
        assert!(files.absolute(&gz).unwrap().exists());
        files.write(1, 1, b"second").await.unwrap();
        assert!(!files.absolute(&gz).unwrap().exists());
    }

    #[tokio::test]
    async fn test_versions_ignore_other_datalayers() {
        let (_dir, files) = store(10);
        files.write(1, 1, b"a").await.unwrap();
        files.write(1, 11, b"b").await.unwrap();
        let versions = files.versions(1, 1).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].size, 1);
        assert!(files.versions(2, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gzip_roundtrip() {
        let (_dir, files) = store(10);
        let content = b"{\"type\":\"FeatureCollection\",\"features\":[]}".repeat(20);
        let path = files.write(1, 1, &content).await.unwrap();
        let gz = files.gzip(&path).await.unwrap();
        assert_eq!(gz, format!("{}.gz", path));
        let compressed = files.read(&gz).await.unwrap();
        let mut decoded = Vec::new();
        GzDecoder::new(&compressed[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, content);
        // Second call reuses the fresh sibling
        assert_eq!(files.gzip(&path).await.unwrap(), gz);
    }

    #[test]
    fn test_version_path_validation() {
        let (_dir, files) = store(10);
        assert_eq!(
            files.version_path(302, 5, "5_1400000000000.geojson").unwrap(),
            "datalayer/2/0/302/5_1400000000000.geojson"
        );
        assert!(files.version_path(302, 5, "6_1400000000000.geojson").is_err());
        assert!(files.version_path(302, 5, "5_../../x.geojson").is_err());
        assert!(files.version_path(302, 5, "5_.geojson").is_err());
        assert!(files.version_path(302, 5, "5_123.geojson.gz").is_err());
    }

    #[tokio::test]
    async fn test_remove_all_spares_other_datalayers() {
        let (_dir, files) = store(10);
        files.write(1, 1, b"content").await.unwrap();
        let other = files.write(2, 9, b"content").await.unwrap();
        assert!(other.starts_with("datalayer/2/0/2/9_"));

        files.remove_all(1, 1).await.unwrap();
        assert!(files.versions(1, 1).await.unwrap().is_empty());
        assert_eq!(files.versions(2, 9).await.unwrap().len(), 1);
    }

    #[test]
    fn test_etag_is_quoted_sha256() {
        let tag = etag(b"abc");
        assert_eq!(tag.len(), 66);
        assert!(tag.starts_with('"') && tag.ends_with('"'));
        assert_eq!(tag, etag(b"abc"));
        assert_ne!(tag, etag(b"abd"));
    }

    #[test]
    fn test_if_match() {
        let current = etag(b"abc");
        assert!(if_match(None, &current));
        assert!(if_match(Some(""), &current));
        assert!(if_match(Some("*"), &current));
        assert!(if_match(Some(&current), &current));
        assert!(if_match(Some(&format!("W/{}", current)), &current));
        assert!(if_match(Some(&format!("\"other\", {}", current)), &current));
        assert!(!if_match(Some("\"other\""), &current));
    }

    #[test]
    fn test_if_none_match() {
        let current = etag(b"abc");
        assert!(!if_none_match(None, &current));
        assert!(if_none_match(Some(&current), &current));
        assert!(!if_none_match(Some("\"stale\""), &current));
    }
}
