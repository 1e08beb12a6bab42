//! Email verification gate. OAuth identities are pre-verified by the
//! upstream provider; email/password identities must confirm before any
//! content renders.

use crate::provider::Identity;
use regex::Regex;
use std::sync::OnceLock;

/// True when the identity must clear the verification wall first.
pub fn needs_verification(identity: &Identity) -> bool {
    !identity.is_oauth() && identity.email_confirmed_at.is_none()
}

/// True when the identity may see content (complement of
/// [`needs_verification`]).
pub fn has_access(identity: &Identity) -> bool {
    identity.is_oauth() || identity.email_confirmed_at.is_some()
}

/// Lowercases and trims an address before it is sent anywhere.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Shape check only; deliverability is the provider's problem.
pub fn valid_email(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9._%+\-]*@[a-z0-9.\-]+\.[a-z]{2,}$").unwrap()
    });
    re.is_match(email)
}
