//! Configuration
//!
//! Two layers:
//!
//! - [`Settings`]: the flat key-value store persisted as YAML, with a
//!   built-in defaults table. This is what `cloudraid config` edits.
//! - [`CoreConfig`] / [`IntakeConfig`]: typed views resolved once when the
//!   engine is built. A missing required key fails construction with
//!   [`Error::MissingConfigValue`].
//!
//! # Keys
//!
//! | key                     | default    |
//! |-------------------------|------------|
//! | `split.input.dir`       | required   |
//! | `split.output.dir`      | required   |
//! | `merge.input.dir`       | required   |
//! | `merge.output.dir`      | required   |
//! | `file.password`         | required   |
//! | `upload.asynchronous`   | `false`    |
//! | `core.slots`            | `4`        |
//! | `core.acquire.blocking` | `true`     |
//! | `merge.tolerate.missing`| `true`     |
//! | `split.cleanup`         | `true`     |
//! | `codec.block.size`      | `1024`     |
//! | `intake.workers`        | `3`        |
//! | `intake.interval.ms`    | `2000`     |
//! | `intake.scan.interval.ms` | `1000`   |
//! | `intake.mode`           | `validate` |
//! | `intake.owner`          | `0`        |
//! | `intake.watch.dir`      | unset      |
//! | `connector.{i}.path`    | unset      |
//! | `events.log`            | unset      |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde_yaml::Value;
use tracing::debug;

use crate::domain::ports::UserId;
use crate::error::{Error, Result};

/// Built-in defaults for optional keys.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("upload.asynchronous", "false"),
    ("core.slots", "4"),
    ("core.acquire.blocking", "true"),
    ("merge.tolerate.missing", "true"),
    ("split.cleanup", "true"),
    ("codec.block.size", "1024"),
    ("intake.workers", "3"),
    ("intake.interval.ms", "2000"),
    ("intake.scan.interval.ms", "1000"),
    ("intake.mode", "validate"),
    ("intake.owner", "0"),
];

// =============================================================================
// Settings
// =============================================================================

/// One row of [`Settings::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
    /// Value comes from the defaults table
    pub is_default: bool,
}

/// Flat string settings with a defaults fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Load settings from a YAML mapping. A missing file yields empty settings.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_yaml(&raw)
    }

    /// Parse a YAML mapping of scalar values.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed: BTreeMap<String, Value> = serde_yaml::from_str(raw)?;
        let mut values = BTreeMap::new();
        for (key, value) in parsed {
            let value = match value {
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Null => String::new(),
                other => {
                    return Err(Error::Config(format!(
                        "{} must be a scalar, got {:?}",
                        key, other
                    )))
                }
            };
            values.insert(key, value);
        }
        Ok(Self { values })
    }

    /// Write explicitly set keys as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_yaml::to_string(&self.values)?)?;
        Ok(())
    }

    fn default_for(key: &str) -> Option<&'static str> {
        DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// Raw value, explicit or default.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .or_else(|| Self::default_for(key))
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| Error::MissingConfigValue(key.to_string()))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get_string(key)?.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(Error::Config(format!("{} is not a boolean: {}", key, other))),
        }
    }

    pub fn get_usize(&self, key: &str) -> Result<usize> {
        self.parse(key)
    }

    pub fn get_u64(&self, key: &str) -> Result<u64> {
        self.parse(key)
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<T> {
        let raw = self.get_string(key)?;
        raw.trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has invalid value {}", key, raw)))
    }

    /// Whether the key is set explicitly or has a default.
    pub fn key_exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Remove an explicit value; the default (if any) applies again.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Explicit values merged with the defaults they do not override.
    pub fn entries(&self) -> Vec<SettingEntry> {
        let mut merged: BTreeMap<&str, SettingEntry> = BTreeMap::new();
        for (key, value) in DEFAULTS.iter().copied() {
            merged.insert(
                key,
                SettingEntry {
                    key: key.to_string(),
                    value: value.to_string(),
                    is_default: true,
                },
            );
        }
        for (key, value) in &self.values {
            merged.insert(
                key.as_str(),
                SettingEntry {
                    key: key.clone(),
                    value: value.clone(),
                    is_default: false,
                },
            );
        }
        merged.into_values().collect()
    }
}

// =============================================================================
// Core Configuration
// =============================================================================

/// What `acquire` does when every slot is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Wait for a slot to be released
    Blocking,
    /// Fail with `Error::SlotUnavailable`
    FailFast,
}

/// How retrieval treats a shard that could not be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPolicy {
    /// Merge from two shards and let the codec rebuild the third
    TolerateOneMissing,
    /// Any fetch failure fails the retrieval
    RequireAll,
}

/// Typed settings for the distribution engine.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Staging directory for uploaded data
    pub split_input_dir: PathBuf,
    /// Directory the codec writes shards into
    pub split_output_dir: PathBuf,
    /// Directory fetched shards are staged in for merging
    pub merge_input_dir: PathBuf,
    /// Directory merged files are written to
    pub merge_output_dir: PathBuf,
    /// Codec passphrase
    pub passphrase: String,
    /// Run distribution jobs as detached tasks
    pub asynchronous: bool,
    /// Pool capacity
    pub slots: usize,
    pub acquire_mode: AcquireMode,
    pub retrieval: RetrievalPolicy,
    /// Remove staged input and shards after a successful distribution
    pub cleanup: bool,
    /// Codec half-block size
    pub block_size: usize,
}

impl CoreConfig {
    /// Resolve from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let slots = settings.get_usize("core.slots")?;
        if slots == 0 {
            return Err(Error::Config("core.slots must be at least 1".to_string()));
        }

        Ok(Self {
            split_input_dir: settings.get_string("split.input.dir")?.into(),
            split_output_dir: settings.get_string("split.output.dir")?.into(),
            merge_input_dir: settings.get_string("merge.input.dir")?.into(),
            merge_output_dir: settings.get_string("merge.output.dir")?.into(),
            passphrase: settings.get_string("file.password")?,
            asynchronous: settings.get_bool("upload.asynchronous")?,
            slots,
            acquire_mode: if settings.get_bool("core.acquire.blocking")? {
                AcquireMode::Blocking
            } else {
                AcquireMode::FailFast
            },
            retrieval: if settings.get_bool("merge.tolerate.missing")? {
                RetrievalPolicy::TolerateOneMissing
            } else {
                RetrievalPolicy::RequireAll
            },
            cleanup: settings.get_bool("split.cleanup")?,
            block_size: settings.get_usize("codec.block.size")?,
        })
    }

    /// Config with all four staging directories below `root` and default
    /// values for everything else.
    pub fn with_staging_root(root: &Path, passphrase: impl Into<String>) -> Self {
        Self {
            split_input_dir: root.join("split-in"),
            split_output_dir: root.join("split-out"),
            merge_input_dir: root.join("merge-in"),
            merge_output_dir: root.join("merge-out"),
            passphrase: passphrase.into(),
            asynchronous: false,
            slots: 4,
            acquire_mode: AcquireMode::Blocking,
            retrieval: RetrievalPolicy::TolerateOneMissing,
            cleanup: true,
            block_size: crate::ec::DEFAULT_BLOCK_SIZE,
        }
    }

    /// Create every staging directory.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.split_input_dir,
            &self.split_output_dir,
            &self.merge_input_dir,
            &self.merge_output_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Intake Configuration
// =============================================================================

/// What intake workers do with a dequeued change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeMode {
    /// Split, merge and clean up locally to validate the codec
    Validate,
    /// Route into the distribution engine
    Distribute,
}

impl FromStr for IntakeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validate" => Ok(IntakeMode::Validate),
            "distribute" => Ok(IntakeMode::Distribute),
            other => Err(Error::Config(format!("unknown intake.mode {}", other))),
        }
    }
}

/// Typed settings for the intake pipeline.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub workers: usize,
    /// Base poll interval; worker `i` sleeps `(i + 1) * interval`
    pub interval: Duration,
    /// Directory scanner poll interval
    pub scan_interval: Duration,
    pub mode: IntakeMode,
    /// Directory to watch, if any
    pub watch_dir: Option<PathBuf>,
    /// Owner of records created from the watched directory
    pub owner: UserId,
}

impl IntakeConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let workers = settings.get_usize("intake.workers")?;
        if workers == 0 {
            return Err(Error::Config("intake.workers must be at least 1".to_string()));
        }

        Ok(Self {
            workers,
            interval: Duration::from_millis(settings.get_u64("intake.interval.ms")?),
            scan_interval: Duration::from_millis(settings.get_u64("intake.scan.interval.ms")?),
            mode: settings.get_string("intake.mode")?.parse()?,
            watch_dir: settings.get("intake.watch.dir").map(PathBuf::from),
            owner: UserId(settings.get_u64("intake.owner")?),
        })
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            interval: Duration::from_millis(2000),
            scan_interval: Duration::from_millis(1000),
            mode: IntakeMode::Validate,
            watch_dir: None,
            owner: UserId(0),
        }
    }
}
