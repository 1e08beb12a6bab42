//! Session state and the render-decision table.
//!
//! `status` is always derived from the cached identity plus the recovery
//! intent; nothing assigns it directly. Recovery outranks Authorized so a
//! user who is both confirmed and mid-recovery is still forced through the
//! password change.

use crate::provider::Identity;
use crate::routes::{Redirect, RenderDecision, Route};
use crate::verification::needs_verification;
use serde::{Deserialize, Serialize};

mod gate;
mod spinner;

pub use gate::SessionGate;
pub use spinner::SpinnerTimer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Initial fetch has not resolved yet.
    Unresolved,
    Anonymous,
    /// Signed in with an unconfirmed email address.
    PendingVerification,
    Authorized,
    /// Signed in through a password-recovery link; must set a new password.
    RecoveryRequired,
}

/// Read-only session snapshot handed to the router. Reset to `Unresolved`
/// on a full page reload; within one mount it only changes through provider
/// events or explicit gate operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<Identity>,
    pub status: SessionStatus,
}

impl Session {
    pub fn unresolved() -> Self {
        Self {
            identity: None,
            status: SessionStatus::Unresolved,
        }
    }

    /// Derives the status from an identity snapshot and whether an
    /// unexpired recovery intent is present.
    pub fn from_identity(identity: Option<Identity>, recovery_active: bool) -> Self {
        let status = match &identity {
            None => SessionStatus::Anonymous,
            Some(_) if recovery_active => SessionStatus::RecoveryRequired,
            Some(id) if needs_verification(id) => SessionStatus::PendingVerification,
            Some(_) => SessionStatus::Authorized,
        };
        Self { identity, status }
    }

    /// Decides what to render for `route`, as a pure function of this
    /// snapshot. Public routes stay reachable in every resolved state so
    /// their own flows can complete.
    pub fn resolve(&self, route: &Route) -> RenderDecision {
        match self.status {
            SessionStatus::Unresolved => RenderDecision::ShowLoading,
            _ if route.is_public() => RenderDecision::RenderPublic,
            SessionStatus::Anonymous => RenderDecision::RedirectTo(Redirect::to_login()),
            SessionStatus::PendingVerification => RenderDecision::RenderVerificationWall,
            SessionStatus::RecoveryRequired => {
                // Already on the reset page: render the form instead of
                // redirecting to ourselves.
                if *route == Route::PasswordReset {
                    RenderDecision::RenderContent
                } else {
                    RenderDecision::RedirectTo(Redirect::to_password_reset())
                }
            }
            SessionStatus::Authorized => RenderDecision::RenderContent,
        }
    }
}
