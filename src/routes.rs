//! Route classification and render decisions. Public routes must stay
//! reachable while authenticated so their own flows (login redirect loops,
//! callback exchanges, verification links) can complete.

use std::fmt;

pub const LOGIN_PATH: &str = "/login";
pub const AUTH_CALLBACK_PATH: &str = "/auth/callback";
pub const VERIFY_EMAIL_PATH: &str = "/verify-email";
pub const PASSWORD_RESET_PATH: &str = "/reset-password";

/// Query markers appended when the gate forces a recovery redirect.
pub const RECOVERY_MARKER: &str = "from=recovery";
pub const SECURITY_MARKER: &str = "security=check";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Login,
    AuthCallback,
    VerifyEmail,
    PasswordReset,
    /// Any other path; gated behind an authorized session.
    Protected(String),
}

impl Route {
    /// Classifies a request path, ignoring query and fragment.
    pub fn from_path(path: &str) -> Self {
        let bare = path.split(['?', '#']).next().unwrap_or(path);
        let bare = bare.trim_end_matches('/');
        let bare = if bare.is_empty() { "/" } else { bare };
        match bare {
            LOGIN_PATH => Self::Login,
            AUTH_CALLBACK_PATH => Self::AuthCallback,
            VERIFY_EMAIL_PATH => Self::VerifyEmail,
            PASSWORD_RESET_PATH => Self::PasswordReset,
            other => Self::Protected(other.to_string()),
        }
    }

    /// Routes that render for any session status.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Login | Self::AuthCallback | Self::VerifyEmail)
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Login => LOGIN_PATH,
            Self::AuthCallback => AUTH_CALLBACK_PATH,
            Self::VerifyEmail => VERIFY_EMAIL_PATH,
            Self::PasswordReset => PASSWORD_RESET_PATH,
            Self::Protected(path) => path,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.path())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectReason {
    Unauthenticated,
    Recovery,
}

/// A redirect target with enough context for the page to explain itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    pub target: Route,
    pub reason: RedirectReason,
}

impl Redirect {
    pub fn to_login() -> Self {
        Self {
            target: Route::Login,
            reason: RedirectReason::Unauthenticated,
        }
    }

    pub fn to_password_reset() -> Self {
        Self {
            target: Route::PasswordReset,
            reason: RedirectReason::Recovery,
        }
    }

    /// Full location including the recovery markers consumed by the reset page.
    pub fn location(&self) -> String {
        match self.reason {
            RedirectReason::Unauthenticated => self.target.path().to_string(),
            RedirectReason::Recovery => {
                format!(
                    "{}?{RECOVERY_MARKER}&{SECURITY_MARKER}",
                    self.target.path()
                )
            }
        }
    }
}

/// What the router should do for the current route and session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderDecision {
    /// Session still unresolved; show the placeholder (after the
    /// anti-flicker delay, see [`crate::session::SessionGate`]).
    ShowLoading,
    /// Public route; render regardless of session status.
    RenderPublic,
    /// Authorized; mount the content page.
    RenderContent,
    /// Signed in but the email is unconfirmed; block with the wall.
    RenderVerificationWall,
    RedirectTo(Redirect),
}

#[cfg(test)]
mod tests {
    use super::{Redirect, Route};

    #[test]
    fn from_path_classifies_known_routes() {
        assert_eq!(Route::from_path("/login"), Route::Login);
        assert_eq!(Route::from_path("/auth/callback"), Route::AuthCallback);
        assert_eq!(Route::from_path("/verify-email"), Route::VerifyEmail);
        assert_eq!(Route::from_path("/reset-password"), Route::PasswordReset);
        assert_eq!(
            Route::from_path("/report"),
            Route::Protected("/report".to_string())
        );
        assert_eq!(Route::from_path("/"), Route::Protected("/".to_string()));
    }

    #[test]
    fn from_path_strips_query_fragment_and_trailing_slash() {
        assert_eq!(Route::from_path("/login?next=/report"), Route::Login);
        assert_eq!(Route::from_path("/verify-email#token"), Route::VerifyEmail);
        assert_eq!(Route::from_path("/reset-password/"), Route::PasswordReset);
    }

    #[test]
    fn public_routes_stay_reachable() {
        assert!(Route::Login.is_public());
        assert!(Route::AuthCallback.is_public());
        assert!(Route::VerifyEmail.is_public());
        assert!(!Route::PasswordReset.is_public());
        assert!(!Route::Protected("/report".to_string()).is_public());
    }

    #[test]
    fn recovery_redirect_carries_markers() {
        let redirect = Redirect::to_password_reset();
        assert_eq!(
            redirect.location(),
            "/reset-password?from=recovery&security=check"
        );
        assert_eq!(Redirect::to_login().location(), "/login");
    }
}
