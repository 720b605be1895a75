//! Structured observability hooks for the update check lifecycle.
//!
//! This module provides:
//! - Check-scoped tracing spans via the `CheckSpan` RAII guard
//! - Emission functions for lifecycle events: check start/finish, state
//!   changes, resolution, install start/finish, and reported errors
//!
//! Events are emitted at `info!` level, failures at `warn!`/`error!`.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::coordinator::UpdateState;
use crate::domain::CheckStatus;

/// RAII guard that enters a check-scoped span while a coordinator handler runs.
///
/// # Example
///
/// ```ignore
/// let _span = CheckSpan::enter(check_id);
/// // tracing calls are now associated with check_id
/// ```
pub struct CheckSpan {
    _span: tracing::span::EnteredSpan,
}

impl CheckSpan {
    pub fn enter(check_id: Uuid) -> Self {
        let span = tracing::info_span!("selfupdate.check", check_id = %check_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_check_started(check_id: Uuid, current_version: &str, sources: usize) {
    info!(
        event = "update.check_started",
        check_id = %check_id,
        current_version = %current_version,
        sources = sources,
    );
}

pub fn emit_check_rejected(reason: &str) {
    warn!(event = "update.check_rejected", reason = %reason);
}

pub fn emit_state_changed(check_id: Uuid, from: UpdateState, to: UpdateState) {
    info!(event = "update.state_changed", check_id = %check_id, from = %from, to = %to);
}

/// Emit event: resolution finished with the given outcome label.
pub fn emit_resolved(check_id: Uuid, outcome: &str, target: Option<&str>) {
    info!(
        event = "update.resolved",
        check_id = %check_id,
        outcome = %outcome,
        target = target.unwrap_or("-"),
    );
}

pub fn emit_install_started(check_id: Uuid, from: &str, to: &str, artifacts: usize) {
    info!(
        event = "update.install_started",
        check_id = %check_id,
        from = %from,
        to = %to,
        artifacts = artifacts,
    );
}

pub fn emit_install_finished(check_id: Uuid, outcome: &str) {
    info!(event = "update.install_finished", check_id = %check_id, outcome = %outcome);
}

pub fn emit_check_finished(check_id: Uuid, status: CheckStatus, duration_ms: u64) {
    info!(
        event = "update.check_finished",
        check_id = %check_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

/// Emit event: an error was reported to the user under `reference`.
///
/// The full cause is logged here and never forwarded to the sink.
pub fn emit_error(check_id: Uuid, reference: Uuid, cause: &dyn std::fmt::Display) {
    error!(
        event = "update.error",
        check_id = %check_id,
        reference = %reference,
        error = %cause,
    );
}
