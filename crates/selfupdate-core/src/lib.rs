//! selfupdate core library
//!
//! The resolve → decide → install → notify workflow for applications that
//! update themselves from one or more release repositories.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod fakes;
pub mod install;
pub mod job;
pub mod notify;
pub mod obs;
pub mod repository;
pub mod resolver;
pub mod source;
pub mod telemetry;

/// Version of this crate, used in the default user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::UpdateConfig;

pub use coordinator::{CheckCanceller, CheckTicket, Transition, UpdateCoordinator, UpdateState};

pub use domain::{
    Artifact, CheckStatus, ConfigError, CoordinatorError, InstallError, InstallOutcome,
    InvalidLocation, JobError, ResolutionResult, ResolveError, UpdatePlan,
};

pub use install::{installed_version, HostEnvironment, InstallExecutor, ProcessEnvironment};

pub use job::{CancellationToken, JobContext, JobHandle, JobProgress};

pub use notify::{LoggingSink, NotificationSink, UserNotice};

pub use repository::{ArtifactFetcher, RemoteRepository, RepositoryClient, RepositoryIndex};

pub use resolver::UpdateResolver;

pub use source::{RepositoryLocation, RepositorySource};
