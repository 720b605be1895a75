//! Host-environment precondition for self-modification.

use std::path::{Component, Path, PathBuf};

/// Decides whether the host may modify its own installation.
///
/// Implementations must be synchronous and free of side effects; the
/// executor calls this before touching anything.
pub trait HostEnvironment: Send + Sync {
    /// `Err(reason)` when self-update must not proceed.
    fn check(&self, install_root: &Path) -> Result<(), String>;
}

/// Inspects the running process and the install root.
///
/// Unsupported when:
/// - the install root is missing, not a directory, or read-only
/// - the executable runs from a cargo build tree (`target/debug`,
///   `target/release`), i.e. from a development checkout rather than an
///   installation
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    executable: Option<PathBuf>,
}

impl ProcessEnvironment {
    /// Environment of the current process.
    pub fn current() -> Self {
        Self {
            executable: std::env::current_exe().ok(),
        }
    }

    /// Environment for an explicit executable path.
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
        }
    }
}

impl HostEnvironment for ProcessEnvironment {
    fn check(&self, install_root: &Path) -> Result<(), String> {
        if let Some(exe) = &self.executable {
            if is_build_tree(exe) {
                return Err(format!(
                    "running from a development build ({}); install a release build to update",
                    exe.display()
                ));
            }
        }

        let meta = std::fs::metadata(install_root).map_err(|e| {
            format!("install root {} is not accessible: {e}", install_root.display())
        })?;
        if !meta.is_dir() {
            return Err(format!(
                "install root {} is not a directory",
                install_root.display()
            ));
        }
        if meta.permissions().readonly() {
            return Err(format!("install root {} is read-only", install_root.display()));
        }
        Ok(())
    }
}

fn is_build_tree(exe: &Path) -> bool {
    let parts: Vec<&std::ffi::OsStr> = exe
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p),
            _ => None,
        })
        .collect();
    parts.windows(2).any(|w| {
        w[0] == "target" && (w[1] == "debug" || w[1] == "release")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tree_detection() {
        assert!(is_build_tree(Path::new("/home/dev/app/target/debug/app")));
        assert!(is_build_tree(Path::new("/home/dev/app/target/release/app")));
        assert!(!is_build_tree(Path::new("/opt/app/bin/app")));
        assert!(!is_build_tree(Path::new("/srv/target/app")));
    }

    #[test]
    fn test_dev_build_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let env = ProcessEnvironment::with_executable("/work/app/target/debug/app");
        let reason = env.check(dir.path()).unwrap_err();
        assert!(reason.contains("development build"));
    }

    #[test]
    fn test_missing_root_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let env = ProcessEnvironment::with_executable("/opt/app/bin/app");
        let reason = env.check(&dir.path().join("missing")).unwrap_err();
        assert!(reason.contains("not accessible"));
    }

    #[test]
    fn test_writable_root_is_supported() {
        let dir = tempfile::tempdir().unwrap();
        let env = ProcessEnvironment::with_executable("/opt/app/bin/app");
        assert!(env.check(dir.path()).is_ok());
    }
}
