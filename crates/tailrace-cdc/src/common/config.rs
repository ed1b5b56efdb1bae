//! Commit-log pipeline configuration
//!
//! Typed configuration with sensible defaults, a builder for programmatic
//! wiring, and `from_properties` for the dotted-key form used by connector
//! deployments. Unknown keys are ignored except under the transfer prefix,
//! which is collected verbatim (prefix stripped) and handed to the configured
//! transfer strategy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::error::{CdcError, Result};

// Recognized property keys.
pub const COMMIT_LOG_DIR: &str = "commit.log.dir";
pub const REAL_TIME_PROCESSING_ENABLED: &str = "commit.log.real.time.processing.enabled";
pub const MARKED_COMPLETE_POLL_INTERVAL_MS: &str = "commit.log.marked.complete.poll.interval.ms";
pub const POST_PROCESSING_ENABLED: &str = "commit.log.post.processing.enabled";
pub const ERROR_REPROCESSING_ENABLED: &str = "commit.log.error.reprocessing.enabled";
pub const TRANSFER: &str = "commit.log.transfer";
pub const TRANSFER_PREFIX: &str = "commit.log.transfer.";
pub const OFFSET_BACKING_STORE_DIR: &str = "offset.backing.store.dir";
pub const OFFSET_FLUSH_INTERVAL_MS: &str = "offset.flush.interval.ms";
pub const MAX_OFFSET_FLUSH_SIZE: &str = "max.offset.flush.size";
pub const NUM_OF_CHANGE_EVENT_QUEUES: &str = "num.of.change.event.queues";
pub const MAX_QUEUE_SIZE: &str = "max.queue.size";
pub const FIELD_EXCLUDE_LIST: &str = "field.exclude.list";
pub const TOMBSTONES_ON_DELETE: &str = "tombstones.on.delete";
pub const CDC_DIR_POLL_INTERVAL_MS: &str = "cdc.dir.poll.interval.ms";
pub const SCHEMA_REFRESH_INTERVAL_MS: &str = "schema.refresh.interval.ms";
pub const SCHEMA_RETRY_ATTEMPTS: &str = "schema.retry.attempts";
pub const LATEST_COMMIT_LOG_ONLY: &str = "latest.commit.log.only";

/// Default transfer strategy name.
pub const DEFAULT_TRANSFER: &str = "delete";

/// Configuration for the commit-log ingestion pipeline.
#[derive(Debug, Clone)]
pub struct CommitLogConfig {
    /// Directory watched for segment files (required)
    pub commit_log_dir: PathBuf,
    /// Process the active segment incrementally instead of waiting for
    /// segments to be marked complete
    pub real_time_processing: bool,
    /// How often to re-read a segment's index marker while waiting for
    /// progress or completion
    pub marked_complete_poll_interval: Duration,
    /// Invoke the transfer hook after a segment seals
    pub post_processing_enabled: bool,
    /// Re-admit errored segments from their last persisted cursor
    pub error_reprocessing_enabled: bool,
    /// Transfer strategy name looked up in the registry
    pub transfer: String,
    /// Property bag for the transfer strategy, prefix already stripped
    pub transfer_properties: HashMap<String, String>,
    /// Directory for the offset backing store (required)
    pub offset_dir: PathBuf,
    /// Time-based flush trigger; zero means flush on every record
    pub offset_flush_interval: Duration,
    /// Count-based flush trigger
    pub max_offset_flush_size: usize,
    /// Number of change event queues (>= 1)
    pub num_queues: usize,
    /// Capacity of each change event queue
    pub max_queue_size: usize,
    /// Fully-qualified `keyspace.table.column` names excluded from events
    pub field_exclude_list: Vec<String>,
    /// Split mixed delete+write mutations into a delete-then-write pair
    pub tombstones_on_delete: bool,
    /// Watch-directory discovery poll interval
    pub dir_poll_interval: Duration,
    /// Wait between schema lookup retries for a deferred mutation
    pub schema_refresh_interval: Duration,
    /// Schema lookup retries before a deferred mutation is reported
    pub schema_retry_attempts: u32,
    /// On the first scan, admit only the highest-ordered pre-existing segment
    pub latest_segment_only: bool,
}

impl Default for CommitLogConfig {
    fn default() -> Self {
        Self {
            commit_log_dir: PathBuf::new(),
            real_time_processing: false,
            marked_complete_poll_interval: Duration::from_millis(10_000),
            post_processing_enabled: true,
            error_reprocessing_enabled: false,
            transfer: DEFAULT_TRANSFER.to_string(),
            transfer_properties: HashMap::new(),
            offset_dir: PathBuf::new(),
            offset_flush_interval: Duration::from_millis(0),
            max_offset_flush_size: 100,
            num_queues: 1,
            max_queue_size: 8192,
            field_exclude_list: Vec::new(),
            tombstones_on_delete: false,
            dir_poll_interval: Duration::from_millis(10_000),
            schema_refresh_interval: Duration::from_millis(10_000),
            schema_retry_attempts: 3,
            latest_segment_only: false,
        }
    }
}

impl CommitLogConfig {
    /// Start building a config.
    pub fn builder() -> CommitLogConfigBuilder {
        CommitLogConfigBuilder::default()
    }

    /// Parse the dotted-property form. Unrecognized keys are ignored, except
    /// keys under `commit.log.transfer.` which are collected into the
    /// transfer property bag with the prefix stripped.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in props {
            match key.as_str() {
                COMMIT_LOG_DIR => config.commit_log_dir = PathBuf::from(value),
                REAL_TIME_PROCESSING_ENABLED => {
                    config.real_time_processing = parse_bool(key, value)?
                }
                MARKED_COMPLETE_POLL_INTERVAL_MS => {
                    config.marked_complete_poll_interval = parse_millis(key, value)?
                }
                POST_PROCESSING_ENABLED => config.post_processing_enabled = parse_bool(key, value)?,
                ERROR_REPROCESSING_ENABLED => {
                    config.error_reprocessing_enabled = parse_bool(key, value)?
                }
                TRANSFER => config.transfer = value.clone(),
                OFFSET_BACKING_STORE_DIR => config.offset_dir = PathBuf::from(value),
                OFFSET_FLUSH_INTERVAL_MS => {
                    config.offset_flush_interval = parse_millis(key, value)?
                }
                MAX_OFFSET_FLUSH_SIZE => config.max_offset_flush_size = parse_usize(key, value)?,
                NUM_OF_CHANGE_EVENT_QUEUES => config.num_queues = parse_usize(key, value)?,
                MAX_QUEUE_SIZE => config.max_queue_size = parse_usize(key, value)?,
                FIELD_EXCLUDE_LIST => {
                    config.field_exclude_list = value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                }
                TOMBSTONES_ON_DELETE => config.tombstones_on_delete = parse_bool(key, value)?,
                CDC_DIR_POLL_INTERVAL_MS => config.dir_poll_interval = parse_millis(key, value)?,
                SCHEMA_REFRESH_INTERVAL_MS => {
                    config.schema_refresh_interval = parse_millis(key, value)?
                }
                SCHEMA_RETRY_ATTEMPTS => {
                    config.schema_retry_attempts = parse_usize(key, value)? as u32
                }
                LATEST_COMMIT_LOG_ONLY => config.latest_segment_only = parse_bool(key, value)?,
                other => {
                    if let Some(stripped) = other.strip_prefix(TRANSFER_PREFIX) {
                        config
                            .transfer_properties
                            .insert(stripped.to_string(), value.clone());
                    }
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check required fields and bounds.
    pub fn validate(&self) -> Result<()> {
        if self.commit_log_dir.as_os_str().is_empty() {
            return Err(CdcError::config(format!("{COMMIT_LOG_DIR} is required")));
        }
        if self.offset_dir.as_os_str().is_empty() {
            return Err(CdcError::config(format!(
                "{OFFSET_BACKING_STORE_DIR} is required"
            )));
        }
        if self.num_queues < 1 {
            return Err(CdcError::config(format!(
                "{NUM_OF_CHANGE_EVENT_QUEUES} must be >= 1"
            )));
        }
        if self.max_queue_size < 1 {
            return Err(CdcError::config(format!("{MAX_QUEUE_SIZE} must be >= 1")));
        }
        if self.max_offset_flush_size < 1 {
            return Err(CdcError::config(format!(
                "{MAX_OFFSET_FLUSH_SIZE} must be >= 1"
            )));
        }
        if self.marked_complete_poll_interval.is_zero() {
            return Err(CdcError::config(format!(
                "{MARKED_COMPLETE_POLL_INTERVAL_MS} must be > 0"
            )));
        }
        if self.dir_poll_interval.is_zero() {
            return Err(CdcError::config(format!(
                "{CDC_DIR_POLL_INTERVAL_MS} must be > 0"
            )));
        }
        if self.schema_refresh_interval.is_zero() {
            return Err(CdcError::config(format!(
                "{SCHEMA_REFRESH_INTERVAL_MS} must be > 0"
            )));
        }
        if self.transfer.trim().is_empty() {
            return Err(CdcError::config(format!("{TRANSFER} must not be empty")));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(CdcError::config(format!(
            "{key}: expected true or false, got {value:?}"
        )))
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .trim()
        .parse()
        .map_err(|_| CdcError::config(format!("{key}: expected integer millis, got {value:?}")))?;
    Ok(Duration::from_millis(ms))
}

fn parse_usize(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| CdcError::config(format!("{key}: expected integer, got {value:?}")))
}

/// Builder for [`CommitLogConfig`].
#[derive(Debug, Default)]
pub struct CommitLogConfigBuilder {
    commit_log_dir: Option<PathBuf>,
    real_time_processing: Option<bool>,
    marked_complete_poll_interval: Option<Duration>,
    post_processing_enabled: Option<bool>,
    error_reprocessing_enabled: Option<bool>,
    transfer: Option<String>,
    transfer_properties: Option<HashMap<String, String>>,
    offset_dir: Option<PathBuf>,
    offset_flush_interval: Option<Duration>,
    max_offset_flush_size: Option<usize>,
    num_queues: Option<usize>,
    max_queue_size: Option<usize>,
    field_exclude_list: Option<Vec<String>>,
    tombstones_on_delete: Option<bool>,
    dir_poll_interval: Option<Duration>,
    schema_refresh_interval: Option<Duration>,
    schema_retry_attempts: Option<u32>,
    latest_segment_only: Option<bool>,
}

impl CommitLogConfigBuilder {
    pub fn commit_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.commit_log_dir = Some(dir.into());
        self
    }

    pub fn real_time_processing(mut self, enabled: bool) -> Self {
        self.real_time_processing = Some(enabled);
        self
    }

    pub fn marked_complete_poll_interval(mut self, interval: Duration) -> Self {
        self.marked_complete_poll_interval = Some(interval);
        self
    }

    pub fn post_processing_enabled(mut self, enabled: bool) -> Self {
        self.post_processing_enabled = Some(enabled);
        self
    }

    pub fn error_reprocessing_enabled(mut self, enabled: bool) -> Self {
        self.error_reprocessing_enabled = Some(enabled);
        self
    }

    pub fn transfer(mut self, name: impl Into<String>) -> Self {
        self.transfer = Some(name.into());
        self
    }

    pub fn transfer_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.transfer_properties
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn offset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.offset_dir = Some(dir.into());
        self
    }

    pub fn offset_flush_interval(mut self, interval: Duration) -> Self {
        self.offset_flush_interval = Some(interval);
        self
    }

    pub fn max_offset_flush_size(mut self, size: usize) -> Self {
        self.max_offset_flush_size = Some(size);
        self
    }

    pub fn num_queues(mut self, n: usize) -> Self {
        self.num_queues = Some(n);
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    pub fn field_exclude_list(mut self, list: Vec<String>) -> Self {
        self.field_exclude_list = Some(list);
        self
    }

    pub fn tombstones_on_delete(mut self, enabled: bool) -> Self {
        self.tombstones_on_delete = Some(enabled);
        self
    }

    pub fn dir_poll_interval(mut self, interval: Duration) -> Self {
        self.dir_poll_interval = Some(interval);
        self
    }

    pub fn schema_refresh_interval(mut self, interval: Duration) -> Self {
        self.schema_refresh_interval = Some(interval);
        self
    }

    pub fn schema_retry_attempts(mut self, attempts: u32) -> Self {
        self.schema_retry_attempts = Some(attempts);
        self
    }

    pub fn latest_segment_only(mut self, enabled: bool) -> Self {
        self.latest_segment_only = Some(enabled);
        self
    }

    /// Finish building, validating required fields and bounds.
    pub fn build(self) -> Result<CommitLogConfig> {
        let defaults = CommitLogConfig::default();
        let config = CommitLogConfig {
            commit_log_dir: self.commit_log_dir.unwrap_or(defaults.commit_log_dir),
            real_time_processing: self
                .real_time_processing
                .unwrap_or(defaults.real_time_processing),
            marked_complete_poll_interval: self
                .marked_complete_poll_interval
                .unwrap_or(defaults.marked_complete_poll_interval),
            post_processing_enabled: self
                .post_processing_enabled
                .unwrap_or(defaults.post_processing_enabled),
            error_reprocessing_enabled: self
                .error_reprocessing_enabled
                .unwrap_or(defaults.error_reprocessing_enabled),
            transfer: self.transfer.unwrap_or(defaults.transfer),
            transfer_properties: self
                .transfer_properties
                .unwrap_or(defaults.transfer_properties),
            offset_dir: self.offset_dir.unwrap_or(defaults.offset_dir),
            offset_flush_interval: self
                .offset_flush_interval
                .unwrap_or(defaults.offset_flush_interval),
            max_offset_flush_size: self
                .max_offset_flush_size
                .unwrap_or(defaults.max_offset_flush_size),
            num_queues: self.num_queues.unwrap_or(defaults.num_queues),
            max_queue_size: self.max_queue_size.unwrap_or(defaults.max_queue_size),
            field_exclude_list: self
                .field_exclude_list
                .unwrap_or(defaults.field_exclude_list),
            tombstones_on_delete: self
                .tombstones_on_delete
                .unwrap_or(defaults.tombstones_on_delete),
            dir_poll_interval: self.dir_poll_interval.unwrap_or(defaults.dir_poll_interval),
            schema_refresh_interval: self
                .schema_refresh_interval
                .unwrap_or(defaults.schema_refresh_interval),
            schema_retry_attempts: self
                .schema_retry_attempts
                .unwrap_or(defaults.schema_retry_attempts),
            latest_segment_only: self
                .latest_segment_only
                .unwrap_or(defaults.latest_segment_only),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommitLogConfig::default();
        assert!(!config.real_time_processing);
        assert_eq!(
            config.marked_complete_poll_interval,
            Duration::from_millis(10_000)
        );
        assert!(config.post_processing_enabled);
        assert!(!config.error_reprocessing_enabled);
        assert_eq!(config.transfer, "delete");
        assert!(config.offset_flush_interval.is_zero());
        assert_eq!(config.max_offset_flush_size, 100);
        assert_eq!(config.num_queues, 1);
        assert_eq!(config.max_queue_size, 8192);
        assert!(!config.tombstones_on_delete);
        assert!(!config.latest_segment_only);
    }

    #[test]
    fn test_builder() {
        let config = CommitLogConfig::builder()
            .commit_log_dir("/var/lib/db/cdc_raw")
            .offset_dir("/var/lib/cdc/offsets")
            .real_time_processing(true)
            .num_queues(4)
            .max_queue_size(512)
            .tombstones_on_delete(true)
            .transfer("archive")
            .transfer_property("relocation.dir", "/var/lib/cdc/archive")
            .build()
            .unwrap();

        assert!(config.real_time_processing);
        assert_eq!(config.num_queues, 4);
        assert_eq!(config.max_queue_size, 512);
        assert_eq!(config.transfer, "archive");
        assert_eq!(
            config.transfer_properties.get("relocation.dir").map(String::as_str),
            Some("/var/lib/cdc/archive")
        );
    }

    #[test]
    fn test_builder_requires_dirs() {
        let err = CommitLogConfig::builder().build().unwrap_err();
        assert_eq!(err.error_code(), "config_error");

        let err = CommitLogConfig::builder()
            .commit_log_dir("/tmp/cdc")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains(OFFSET_BACKING_STORE_DIR));
    }

    #[test]
    fn test_from_properties() {
        let mut props = HashMap::new();
        props.insert(COMMIT_LOG_DIR.to_string(), "/data/cdc_raw".to_string());
        props.insert(
            OFFSET_BACKING_STORE_DIR.to_string(),
            "/data/offsets".to_string(),
        );
        props.insert(REAL_TIME_PROCESSING_ENABLED.to_string(), "true".to_string());
        props.insert(
            MARKED_COMPLETE_POLL_INTERVAL_MS.to_string(),
            "2000".to_string(),
        );
        props.insert(NUM_OF_CHANGE_EVENT_QUEUES.to_string(), "3".to_string());
        props.insert(
            FIELD_EXCLUDE_LIST.to_string(),
            "ks1.tbl1.password, ks1.tbl1.ssn".to_string(),
        );
        props.insert(TRANSFER.to_string(), "archive".to_string());
        props.insert(
            format!("{TRANSFER_PREFIX}relocation.dir"),
            "/data/relocated".to_string(),
        );
        props.insert("some.unknown.key".to_string(), "ignored".to_string());

        let config = CommitLogConfig::from_properties(&props).unwrap();
        assert!(config.real_time_processing);
        assert_eq!(
            config.marked_complete_poll_interval,
            Duration::from_millis(2000)
        );
        assert_eq!(config.num_queues, 3);
        assert_eq!(
            config.field_exclude_list,
            vec!["ks1.tbl1.password".to_string(), "ks1.tbl1.ssn".to_string()]
        );
        assert_eq!(config.transfer, "archive");
        assert_eq!(
            config.transfer_properties.get("relocation.dir").map(String::as_str),
            Some("/data/relocated")
        );
    }

    #[test]
    fn test_from_properties_malformed_values() {
        let mut props = HashMap::new();
        props.insert(COMMIT_LOG_DIR.to_string(), "/data/cdc_raw".to_string());
        props.insert(
            OFFSET_BACKING_STORE_DIR.to_string(),
            "/data/offsets".to_string(),
        );
        props.insert(REAL_TIME_PROCESSING_ENABLED.to_string(), "yes".to_string());
        assert!(CommitLogConfig::from_properties(&props).is_err());

        props.insert(REAL_TIME_PROCESSING_ENABLED.to_string(), "true".to_string());
        props.insert(MAX_QUEUE_SIZE.to_string(), "lots".to_string());
        assert!(CommitLogConfig::from_properties(&props).is_err());
    }

    #[test]
    fn test_validate_bounds() {
        let mut config = CommitLogConfig::builder()
            .commit_log_dir("/data/cdc_raw")
            .offset_dir("/data/offsets")
            .build()
            .unwrap();

        config.num_queues = 0;
        assert!(config.validate().is_err());

        config.num_queues = 1;
        config.dir_poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_flush_interval_is_valid() {
        let config = CommitLogConfig::builder()
            .commit_log_dir("/data/cdc_raw")
            .offset_dir("/data/offsets")
            .offset_flush_interval(Duration::ZERO)
            .build()
            .unwrap();
        assert!(config.offset_flush_interval.is_zero());
    }
}
