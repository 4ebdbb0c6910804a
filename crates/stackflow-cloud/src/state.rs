//! Run state for a project
//!
//! Manages the `.stackflow/` directory: a lock file that keeps two runs from
//! reconciling the same plan at once, and the report of the last run.
//! Observed resource state is never stored here; every run observes afresh.

use crate::error::{CloudError, Result};
use crate::report::{Report, RunMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_DIR: &str = ".stackflow";
const REPORT_FILE: &str = "last-report.json";
const REPORT_BACKUP: &str = "last-report.json.backup";
const LOCK_FILE: &str = "lock.json";
const STALE_LOCK_HOURS: i64 = 1;

/// Reads and writes the project's run state
pub struct StateManager {
    /// Project root directory
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    /// Get the state directory path
    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    /// Path of the last run's report
    pub fn report_path(&self) -> PathBuf {
        self.state_dir().join(REPORT_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(REPORT_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the report of the last run, if any
    pub async fn load_last_report(&self) -> Result<Option<Report>> {
        let path = self.report_path();
        if !path.exists() {
            tracing::debug!("No previous report found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let report: Report = serde_json::from_str(&content).map_err(|e| {
            CloudError::StateError(format!("cannot parse {}: {}", path.display(), e))
        })?;
        Ok(Some(report))
    }

    /// Save a report as the last run, keeping the previous one as backup.
    ///
    /// Sensitive outputs are always masked before writing.
    pub async fn save_report(&self, report: &Report) -> Result<PathBuf> {
        self.ensure_state_dir().await?;

        let path = self.report_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created report backup");
        }

        fs::write(&path, report.redacted().to_json_pretty()?).await?;
        tracing::debug!("Saved report with {} results", report.results.len());
        Ok(path)
    }

    /// Acquire the run lock for exclusive access
    pub async fn acquire_lock(&self, mode: RunMode) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < STALE_LOCK_HOURS {
                return Err(CloudError::LockError(format!(
                    "a {} run by {} (pid {}) holds the lock since {}",
                    lock_info.mode, lock_info.holder, lock_info.pid, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            mode,
            acquired_at: Utc::now(),
        };

        fs::write(&lock_path, serde_json::to_string_pretty(&lock_info)?).await?;

        tracing::debug!("Acquired run lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    mode: RunMode,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the run lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released run lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
