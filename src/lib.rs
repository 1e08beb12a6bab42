//! Session gating for a Supabase-backed content site.
//!
//! The crate owns the decision of what a visitor sees on a given route:
//! a loading placeholder, a redirect to login, the email-verification wall,
//! the forced password-reset interstitial, or the content itself. The
//! decision is derived from one initial identity fetch plus push events from
//! the identity provider, with password-recovery sessions reconstructed
//! client-side since the provider issues ordinary tokens for both flows.
//!
//! Access control enforced here is a UX guard; real authorization must live
//! behind the content API.

pub mod callback;
pub mod config;
pub mod provider;
pub mod recovery;
pub mod routes;
pub mod session;
pub mod verification;

pub use callback::{process_callback, CallbackDiagnostics, CallbackFailure, CallbackOutcome};
pub use config::Config;
pub use provider::{AuthEvent, Identity, IdentityProvider, ProviderError, SupabaseProvider};
pub use recovery::{InMemoryTabStore, RecoveryIntent, RecoveryOrigin, RecoveryTracker, TabStore};
pub use routes::{Redirect, RenderDecision, Route};
pub use session::{Session, SessionGate, SessionStatus};
