//! Installation of resolved update plans.
//!
//! # Modules
//!
//! - [`environment`]: `HostEnvironment` precondition, `ProcessEnvironment`
//! - [`executor`]: `InstallExecutor` (stage → commit → finalize)
//! - [`journal`]: `InstallJournal` persisted for rollback and retry
//! - [`layout`]: paths inside the `.selfupdate` state directory
//! - [`lock`]: `InstallLock`, one installing process per root

pub mod environment;
pub mod executor;
pub mod journal;
pub mod layout;
pub mod lock;

/// Name of the updater's state directory inside the install root.
pub const STATE_DIR: &str = ".selfupdate";

pub use environment::{HostEnvironment, ProcessEnvironment};
pub use executor::{installed_version, InstallExecutor};
pub use journal::{InstallJournal, JournalPhase};
pub use layout::StateLayout;
pub use lock::InstallLock;
