//! Domain types shared by the resolver, executor, and coordinator.

pub mod error;
pub mod outcome;
pub mod plan;

pub use error::{
    ConfigError, CoordinatorError, InstallError, InvalidLocation, JobError, ResolveError,
};
pub use outcome::{CheckStatus, InstallOutcome, ResolutionResult};
pub use plan::{Artifact, UpdatePlan};
