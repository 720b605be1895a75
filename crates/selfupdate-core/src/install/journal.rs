//! On-disk record of an install attempt, used to roll back or retry.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::layout::StateLayout;
use crate::domain::InstallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPhase {
    /// Downloading into the staging directory; installed files untouched.
    Staging,
    /// Moving staged files into place.
    Committing,
    /// A commit failed and every touched file was restored.
    RolledBack,
    /// Staging failed; installed files untouched.
    Failed,
}

/// Install journal persisted at `.selfupdate/journal.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallJournal {
    pub from: String,
    pub to: String,
    pub phase: JournalPhase,
    pub artifacts: Vec<PathBuf>,
    /// Files moved into the backup directory, in commit order.
    #[serde(default)]
    pub replaced: Vec<PathBuf>,
    /// Files that did not exist before the commit.
    #[serde(default)]
    pub created: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstallJournal {
    pub fn new(from: String, to: String, artifacts: Vec<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            from,
            to,
            phase: JournalPhase::Staging,
            artifacts,
            replaced: Vec::new(),
            created: Vec::new(),
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Whether installed files may currently be in a mixed state.
    pub fn is_interrupted_commit(&self) -> bool {
        self.phase == JournalPhase::Committing
    }

    pub fn set_phase(&mut self, phase: JournalPhase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, phase: JournalPhase, error: &InstallError) {
        self.last_error = Some(error.to_string());
        self.set_phase(phase);
    }

    /// Atomically persist the journal.
    pub async fn save(&self, layout: &StateLayout) -> Result<(), InstallError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| InstallError::Unknown(format!("serializing journal: {e}")))?;
        write_atomic(&layout.journal(), &bytes).await
    }

    pub async fn load(layout: &StateLayout) -> Result<Option<Self>, InstallError> {
        let path = layout.journal();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                InstallError::Unknown(format!("corrupt journal {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(InstallError::io("reading install journal", e)),
        }
    }

    pub async fn remove(layout: &StateLayout) -> Result<(), InstallError> {
        match tokio::fs::remove_file(layout.journal()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(InstallError::io("removing install journal", e)),
        }
    }
}

/// Write via a temporary file in the same directory, then rename over the
/// destination.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), InstallError> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || -> Result<(), InstallError> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| InstallError::io(format!("creating {}", dir.display()), e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| InstallError::io(format!("creating temp file in {}", dir.display()), e))?;
        tmp.write_all(&bytes)
            .map_err(|e| InstallError::io(format!("writing {}", tmp.path().display()), e))?;
        tmp.persist(&path)
            .map_err(|e| InstallError::io(format!("replacing {}", path.display()), e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| InstallError::Unknown(format!("atomic write task failed: {e}")))?
}
