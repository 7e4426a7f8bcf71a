//! Structured JSONL debug log under `.taskwing/logs/`.
//!
//! One file per logger (`debug-<UTC compact>.log`, mode 0600), a `debug-latest.log` symlink to
//! the current file, and retention of the newest N files. Messages and metadata are redacted
//! before they are written anywhere.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use taskwing_protocol::fsio::state_dir;
use taskwing_protocol::redact::{redact_map, redact_text};

pub const DEFAULT_RETENTION: usize = 5;
pub const LOG_DIR_NAME: &str = "logs";
pub const LATEST_LINK_NAME: &str = "debug-latest.log";
const LOG_FILE_PREFIX: &str = "debug-";
const LOG_FILE_SUFFIX: &str = ".log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugRecord {
    pub timestamp: DateTime<Utc>,
    pub level: DebugLevel,
    pub component: String,
    pub event: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DebugRecord {
    pub fn new(
        level: DebugLevel,
        component: impl Into<String>,
        event: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            event: event.into(),
            message: message.into(),
            metadata: Map::new(),
            agent: None,
            phase: None,
            duration_ms: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn sanitize(&mut self) {
        self.message = redact_text(&self.message);
        redact_map(&mut self.metadata);
        if let Some(error) = &self.error {
            self.error = Some(redact_text(error));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugLogOptions {
    pub stderr: bool,
    pub retention: usize,
}

impl Default for DebugLogOptions {
    fn default() -> Self {
        Self {
            stderr: false,
            retention: DEFAULT_RETENTION,
        }
    }
}

struct DebugLogInner {
    file: Mutex<Option<File>>,
    path: Option<PathBuf>,
    stderr: bool,
}

/// Cheap to clone; a disabled logger drops every record.
#[derive(Clone)]
pub struct DebugLogger {
    inner: Arc<DebugLogInner>,
}

impl std::fmt::Debug for DebugLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugLogger")
            .field("path", &self.inner.path)
            .field("stderr", &self.inner.stderr)
            .finish()
    }
}

impl Default for DebugLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl DebugLogger {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(DebugLogInner {
                file: Mutex::new(None),
                path: None,
                stderr: false,
            }),
        }
    }

    /// Opens a fresh log file under `<root>/.taskwing/logs`, repoints the latest link and prunes
    /// old files.
    pub fn open(root: &Path, options: DebugLogOptions) -> std::io::Result<Self> {
        let dir = state_dir(root).join(LOG_DIR_NAME);
        std::fs::create_dir_all(&dir)?;
        let name = format!(
            "{LOG_FILE_PREFIX}{}{LOG_FILE_SUFFIX}",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );
        let path = dir.join(&name);
        let file = open_private(&path)?;
        point_latest(&dir, &name);
        prune(&dir, options.retention.max(1));

        Ok(Self {
            inner: Arc::new(DebugLogInner {
                file: Mutex::new(Some(file)),
                path: Some(path),
                stderr: options.stderr,
            }),
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.path.is_some() || self.inner.stderr
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn log(&self, mut record: DebugRecord) {
        if !self.is_enabled() {
            return;
        }
        record.sanitize();
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!("unserializable debug record: {err}");
                return;
            }
        };

        if self.inner.stderr {
            eprintln!("{line}");
        }
        let mut guard = match self.inner.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            if let Err(err) = writeln!(file, "{line}") {
                warn!("debug log write failed: {err}");
            }
        }
    }

    pub fn debug(&self, component: &str, event: &str, message: impl Into<String>) {
        self.log(DebugRecord::new(DebugLevel::Debug, component, event, message));
    }

    pub fn info(&self, component: &str, event: &str, message: impl Into<String>) {
        self.log(DebugRecord::new(DebugLevel::Info, component, event, message));
    }

    pub fn warn(&self, component: &str, event: &str, message: impl Into<String>) {
        self.log(DebugRecord::new(DebugLevel::Warn, component, event, message));
    }

    pub fn error(&self, component: &str, event: &str, message: impl Into<String>) {
        self.log(DebugRecord::new(DebugLevel::Error, component, event, message));
    }

    /// Logs `phase_start` and returns the completer for `phase_end` / `phase_error`.
    pub fn start_phase(&self, component: &str, phase: &str) -> Phase {
        let mut record = DebugRecord::new(DebugLevel::Debug, component, "phase_start", phase);
        record.phase = Some(phase.to_string());
        self.log(record);
        Phase {
            logger: self.clone(),
            component: component.to_string(),
            phase: phase.to_string(),
            started: Instant::now(),
        }
    }
}

/// Completer of a timed phase.
#[must_use = "call end() or fail() to record the phase duration"]
pub struct Phase {
    logger: DebugLogger,
    component: String,
    phase: String,
    started: Instant,
}

impl Phase {
    pub fn end(self) {
        let record = self.record(DebugLevel::Info, "phase_end", None);
        self.logger.log(record);
    }

    pub fn fail(self, error: &dyn std::fmt::Display) {
        let record = self.record(DebugLevel::Error, "phase_error", Some(error.to_string()));
        self.logger.log(record);
    }

    fn record(&self, level: DebugLevel, event: &str, error: Option<String>) -> DebugRecord {
        let mut record = DebugRecord::new(level, self.component.clone(), event, self.phase.clone());
        record.phase = Some(self.phase.clone());
        record.duration_ms = Some(self.started.elapsed().as_millis() as u64);
        record.error = error;
        record
    }
}

fn open_private(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn point_latest(dir: &Path, file_name: &str) {
    let link = dir.join(LATEST_LINK_NAME);
    if std::fs::symlink_metadata(&link).is_ok() {
        let _ = std::fs::remove_file(&link);
    }
    #[cfg(unix)]
    let result = std::os::unix::fs::symlink(file_name, &link);
    #[cfg(not(unix))]
    let result = std::fs::copy(dir.join(file_name), &link).map(|_| ());
    if let Err(err) = result {
        warn!("cannot link {}: {err}", link.display());
    }
}

/// Removes all but the newest `keep` log files. Names sort chronologically.
fn prune(dir: &Path, keep: usize) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut logs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name != LATEST_LINK_NAME
                        && name.starts_with(LOG_FILE_PREFIX)
                        && name.ends_with(LOG_FILE_SUFFIX)
                })
        })
        .collect();
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for path in logs.into_iter().take(excess) {
        if let Err(err) = std::fs::remove_file(&path) {
            warn!("cannot prune {}: {err}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn read_records(path: &Path) -> Vec<DebugRecord> {
        std::fs::read_to_string(path)
            .expect("read log")
            .lines()
            .map(|line| serde_json::from_str(line).expect("jsonl"))
            .collect()
    }

    #[test]
    fn writes_redacted_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = DebugLogger::open(dir.path(), DebugLogOptions::default()).expect("open");
        logger.log(
            DebugRecord::new(DebugLevel::Info, "dispatcher", "run", "GITHUB_TOKEN=ghp_x ok")
                .with_agent("code")
                .with_metadata("Authorization", "Bearer abc")
                .with_metadata("files", 3),
        );

        let records = read_records(logger.path().expect("path"));
        assert_eq!(records.len(), 1);
        assert!(!records[0].message.contains("ghp_x"));
        assert_eq!(records[0].metadata["Authorization"], "***REDACTED***");
        assert_eq!(records[0].metadata["files"], 3);
        assert_eq!(records[0].agent.as_deref(), Some("code"));
    }

    #[test]
    fn phases_record_duration_or_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logger = DebugLogger::open(dir.path(), DebugLogOptions::default()).expect("open");
        logger.start_phase("engine", "bootstrap").end();
        logger
            .start_phase("engine", "verify")
            .fail(&"git missing");

        let events: Vec<(String, Option<String>)> = read_records(logger.path().expect("path"))
            .into_iter()
            .map(|r| (r.event, r.error))
            .collect();
        assert_eq!(
            events,
            vec![
                ("phase_start".to_string(), None),
                ("phase_end".to_string(), None),
                ("phase_start".to_string(), None),
                ("phase_error".to_string(), Some("git missing".to_string())),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn file_is_private_and_linked() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let logger = DebugLogger::open(dir.path(), DebugLogOptions::default()).expect("open");
        let path = logger.path().expect("path");
        let mode = std::fs::metadata(path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let link = path.parent().expect("dir").join(LATEST_LINK_NAME);
        assert_eq!(
            std::fs::canonicalize(&link).expect("link"),
            std::fs::canonicalize(path).expect("file")
        );
    }

    #[test]
    fn retention_keeps_newest_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logs = state_dir(dir.path()).join(LOG_DIR_NAME);
        std::fs::create_dir_all(&logs).expect("mkdir");
        for stamp in ["20200101T000000.000Z", "20200102T000000.000Z", "20200103T000000.000Z"] {
            std::fs::write(logs.join(format!("debug-{stamp}.log")), "").expect("seed");
        }
        let logger = DebugLogger::open(
            dir.path(),
            DebugLogOptions {
                stderr: false,
                retention: 2,
            },
        )
        .expect("open");

        let mut names: Vec<String> = std::fs::read_dir(&logs)
            .expect("list")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != LATEST_LINK_NAME)
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], "debug-20200103T000000.000Z.log");
        assert!(logger.path().expect("path").ends_with(&names[1]));
    }

    #[test]
    fn disabled_logger_is_silent() {
        let logger = DebugLogger::disabled();
        assert!(!logger.is_enabled());
        logger.info("engine", "noop", "nothing happens");
        assert!(logger.path().is_none());
    }
}
