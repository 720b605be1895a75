//! Coordinator state machine.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// States of one update check cycle.
///
/// ```text
/// Idle -> Resolving -> NoUpdate
///                   -> ResolutionError
///                   -> InstallPending -> Installing -> InstallSucceeded
///                                                   -> InstallFailed
/// ```
///
/// A new cycle may start from `Idle` or any terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    Resolving,
    NoUpdate,
    ResolutionError,
    InstallPending,
    Installing,
    InstallSucceeded,
    InstallFailed,
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::NoUpdate
                | UpdateState::ResolutionError
                | UpdateState::InstallSucceeded
                | UpdateState::InstallFailed
        )
    }

    /// A job is scheduled or running.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UpdateState::Resolving | UpdateState::InstallPending | UpdateState::Installing
        )
    }

    pub fn can_transition_to(&self, next: UpdateState) -> bool {
        use UpdateState::*;
        match (self, next) {
            (Idle, Resolving) => true,
            (s, Resolving) if s.is_terminal() => true,
            (Resolving, NoUpdate | ResolutionError | InstallPending) => true,
            (InstallPending, Installing) => true,
            (Installing, InstallSucceeded | InstallFailed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateState::Idle => "idle",
            UpdateState::Resolving => "resolving",
            UpdateState::NoUpdate => "no_update",
            UpdateState::ResolutionError => "resolution_error",
            UpdateState::InstallPending => "install_pending",
            UpdateState::Installing => "installing",
            UpdateState::InstallSucceeded => "install_succeeded",
            UpdateState::InstallFailed => "install_failed",
        };
        write!(f, "{s}")
    }
}

/// A state change broadcast to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub check_id: Uuid,
    pub from: UpdateState,
    pub to: UpdateState,
}
