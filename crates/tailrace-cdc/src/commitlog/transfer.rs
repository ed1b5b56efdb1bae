//! Post-processing transfer of sealed segments
//!
//! Once a segment is sealed, a [`CommitLogTransfer`] disposes of the file:
//! delete it, relocate it to an archive directory, or leave it in place.
//! Implementations are created by name through the [`TransferRegistry`], with
//! per-transfer settings arriving as the `commit.log.transfer.*` property bag.
//!
//! A failed transfer must leave the segment file intact; the segment stays
//! sealed and the transfer is retried on a later pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::commitlog::segment::SegmentId;
use crate::common::{CdcError, Result};

/// Built-in transfer names.
pub const DELETE_TRANSFER: &str = "delete";
pub const ARCHIVE_TRANSFER: &str = "archive";
pub const NOOP_TRANSFER: &str = "noop";

/// Property naming the archive target directory.
pub const RELOCATION_DIR_PROPERTY: &str = "relocation.dir";

/// Disposes of one sealed segment and its marker file.
#[async_trait]
pub trait CommitLogTransfer: Send + Sync {
    /// Transfer the segment at `log_path`. On error the segment file must be
    /// left where it was.
    async fn transfer(&self, segment: &SegmentId, log_path: &Path) -> Result<()>;

    fn name(&self) -> &str;
}

/// Builds a transfer from its property bag.
pub trait TransferFactory: Send + Sync {
    fn create(&self, properties: &HashMap<String, String>) -> Result<Arc<dyn CommitLogTransfer>>;
}

/// Name-keyed transfer factories. `with_defaults` registers the built-ins;
/// embedders add their own before building the processor.
#[derive(Default)]
pub struct TransferRegistry {
    factories: HashMap<String, Arc<dyn TransferFactory>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `delete`, `archive`, and `noop`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DELETE_TRANSFER, Arc::new(DeleteTransferFactory));
        registry.register(ARCHIVE_TRANSFER, Arc::new(ArchiveTransferFactory));
        registry.register(NOOP_TRANSFER, Arc::new(NoopTransferFactory));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn TransferFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Build the named transfer from its properties.
    pub fn create(
        &self,
        name: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Arc<dyn CommitLogTransfer>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            let mut known: Vec<&str> = self.factories.keys().map(String::as_str).collect();
            known.sort_unstable();
            CdcError::config(format!(
                "unknown commit log transfer {name:?}, known: {}",
                known.join(", ")
            ))
        })?;
        factory.create(properties)
    }
}

/// Removes the segment and its marker.
pub struct DeleteTransfer;

#[async_trait]
impl CommitLogTransfer for DeleteTransfer {
    async fn transfer(&self, segment: &SegmentId, log_path: &Path) -> Result<()> {
        tokio::fs::remove_file(log_path)
            .await
            .map_err(|e| transfer_err(segment, format!("remove {}: {e}", log_path.display())))?;
        remove_if_present(&segment.marker_path(log_path)).await?;
        info!(segment = %segment, "deleted segment");
        Ok(())
    }

    fn name(&self) -> &str {
        DELETE_TRANSFER
    }
}

struct DeleteTransferFactory;

impl TransferFactory for DeleteTransferFactory {
    fn create(&self, _properties: &HashMap<String, String>) -> Result<Arc<dyn CommitLogTransfer>> {
        Ok(Arc::new(DeleteTransfer))
    }
}

/// Relocates the segment and its marker into an archive directory.
pub struct ArchiveTransfer {
    target_dir: PathBuf,
}

impl ArchiveTransfer {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }
}

#[async_trait]
impl CommitLogTransfer for ArchiveTransfer {
    async fn transfer(&self, segment: &SegmentId, log_path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.target_dir)
            .await
            .map_err(|e| {
                transfer_err(
                    segment,
                    format!("create {}: {e}", self.target_dir.display()),
                )
            })?;

        let log_target = self.target_dir.join(segment.log_file_name());
        relocate(log_path, &log_target)
            .await
            .map_err(|e| transfer_err(segment, format!("relocate {}: {e}", log_path.display())))?;

        let marker_path = segment.marker_path(log_path);
        if tokio::fs::try_exists(&marker_path).await.unwrap_or(false) {
            let marker_target = self.target_dir.join(segment.marker_file_name());
            relocate(&marker_path, &marker_target).await.map_err(|e| {
                transfer_err(segment, format!("relocate {}: {e}", marker_path.display()))
            })?;
        }

        info!(segment = %segment, target = %self.target_dir.display(), "archived segment");
        Ok(())
    }

    fn name(&self) -> &str {
        ARCHIVE_TRANSFER
    }
}

/// Rename, falling back to copy-and-remove when the target sits on another
/// filesystem.
async fn relocate(from: &Path, to: &Path) -> std::io::Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

struct ArchiveTransferFactory;

impl TransferFactory for ArchiveTransferFactory {
    fn create(&self, properties: &HashMap<String, String>) -> Result<Arc<dyn CommitLogTransfer>> {
        let target = properties.get(RELOCATION_DIR_PROPERTY).ok_or_else(|| {
            CdcError::config(format!(
                "archive transfer requires the {RELOCATION_DIR_PROPERTY} property"
            ))
        })?;
        if target.trim().is_empty() {
            return Err(CdcError::config(format!(
                "archive transfer requires a non-empty {RELOCATION_DIR_PROPERTY}"
            )));
        }
        Ok(Arc::new(ArchiveTransfer::new(target.trim())))
    }
}

/// Leaves the segment in place. The completed latch in the offset store is
/// what keeps the segment from being re-admitted on the next scan.
pub struct NoopTransfer;

#[async_trait]
impl CommitLogTransfer for NoopTransfer {
    async fn transfer(&self, segment: &SegmentId, _log_path: &Path) -> Result<()> {
        debug!(segment = %segment, "leaving segment in place");
        Ok(())
    }

    fn name(&self) -> &str {
        NOOP_TRANSFER
    }
}

struct NoopTransferFactory;

impl TransferFactory for NoopTransferFactory {
    fn create(&self, _properties: &HashMap<String, String>) -> Result<Arc<dyn CommitLogTransfer>> {
        Ok(Arc::new(NoopTransfer))
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CdcError::Io(e)),
    }
}

fn transfer_err(segment: &SegmentId, reason: String) -> CdcError {
    CdcError::transfer_failure(segment.log_file_name(), reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg() -> SegmentId {
        SegmentId::new(3, 1)
    }

    async fn seed_segment(dir: &Path) -> PathBuf {
        let log_path = dir.join(seg().log_file_name());
        tokio::fs::write(&log_path, b"log").await.unwrap();
        tokio::fs::write(seg().marker_path(&log_path), b"3\nCOMPLETED\n")
            .await
            .unwrap();
        log_path
    }

    #[tokio::test]
    async fn test_delete_removes_log_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = seed_segment(dir.path()).await;

        DeleteTransfer.transfer(&seg(), &log_path).await.unwrap();
        assert!(!log_path.exists());
        assert!(!seg().marker_path(&log_path).exists());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(seg().log_file_name());
        tokio::fs::write(&log_path, b"log").await.unwrap();

        DeleteTransfer.transfer(&seg(), &log_path).await.unwrap();
        assert!(!log_path.exists());
    }

    #[tokio::test]
    async fn test_delete_fails_when_log_missing() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join(seg().log_file_name());

        let err = DeleteTransfer.transfer(&seg(), &log_path).await.unwrap_err();
        assert!(matches!(err, CdcError::TransferFailure { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_archive_moves_log_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = seed_segment(dir.path()).await;
        let archive_dir = dir.path().join("archive");

        ArchiveTransfer::new(&archive_dir).transfer(&seg(), &log_path).await.unwrap();

        assert!(!log_path.exists());
        assert!(archive_dir.join(seg().log_file_name()).exists());
        assert!(archive_dir.join(seg().marker_file_name()).exists());
    }

    #[tokio::test]
    async fn test_noop_leaves_files() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = seed_segment(dir.path()).await;

        NoopTransfer.transfer(&seg(), &log_path).await.unwrap();
        assert!(log_path.exists());
    }

    #[test]
    fn test_registry_builds_by_name() {
        let registry = TransferRegistry::with_defaults();
        let transfer = registry.create(DELETE_TRANSFER, &HashMap::new()).unwrap();
        assert_eq!(transfer.name(), DELETE_TRANSFER);
    }

    #[test]
    fn test_registry_rejects_unknown_name() {
        let registry = TransferRegistry::with_defaults();
        let err = registry.create("s3", &HashMap::new()).err().unwrap();
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_archive_factory_requires_relocation_dir() {
        let registry = TransferRegistry::with_defaults();
        assert!(registry.create(ARCHIVE_TRANSFER, &HashMap::new()).is_err());

        let mut props = HashMap::new();
        props.insert(RELOCATION_DIR_PROPERTY.to_string(), "/tmp/a".to_string());
        assert!(registry.create(ARCHIVE_TRANSFER, &props).is_ok());
    }
}
