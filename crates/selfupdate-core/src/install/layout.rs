//! Paths of the updater's state directory inside an install root.

use std::path::{Path, PathBuf};

use semver::Version;

use super::STATE_DIR;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    install_root: PathBuf,
    root: PathBuf,
}

impl StateLayout {
    pub fn new(install_root: &Path) -> Self {
        Self {
            install_root: install_root.to_path_buf(),
            root: install_root.join(STATE_DIR),
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// `.selfupdate/`
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging(&self, target: &Version) -> PathBuf {
        self.staging_root().join(target.to_string())
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn backup(&self, from: &str) -> PathBuf {
        self.backup_root().join(from)
    }

    /// Parent of every per-version backup directory.
    pub fn backup_root(&self) -> PathBuf {
        self.root.join("backup")
    }

    pub fn journal(&self) -> PathBuf {
        self.root.join("journal.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("install.lock")
    }

    pub fn version_marker(&self) -> PathBuf {
        self.root.join("installed-version")
    }

    /// Installed location of an artifact path.
    pub fn target(&self, relative: &Path) -> PathBuf {
        self.install_root.join(relative)
    }
}
