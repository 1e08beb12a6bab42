//! Identity-provider boundary. The gate only ever talks to the provider
//! through [`IdentityProvider`], so the Supabase client can be swapped for a
//! mock in tests (or a different provider later) without touching the gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

mod supabase;

pub use supabase::SupabaseProvider;

/// Read-only identity snapshot cached by the gate. Mirrors the provider's
/// user record; contains no secrets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    /// Auth provider name as reported by the identity service, e.g. `email`
    /// or `google`.
    pub provider: String,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// True when the session came from an OAuth provider rather than an
    /// email/password signup.
    pub fn is_oauth(&self) -> bool {
        self.provider != "email"
    }
}

/// Push notifications from the provider's auth-change channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
    TokenRefreshed(Identity),
}

/// One-time-code kinds accepted by the verify endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Signup,
    Recovery,
    MagicLink,
    Email,
}

impl OtpType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Recovery => "recovery",
            Self::MagicLink => "magiclink",
            Self::Email => "email",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("provider call timed out")]
    Timeout,
    #[error("unexpected provider payload: {0}")]
    Decode(String),
    #[error("no active session")]
    NotSignedIn,
    #[error("invalid email address")]
    InvalidEmail,
}

impl ProviderError {
    /// Message from the provider's error body, when there is one. Used by
    /// the callback flow to classify expired vs already-used links.
    pub fn provider_message(&self) -> Option<&str> {
        match self {
            Self::Http { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Operations consumed from the external identity provider.
///
/// Every call is fallible I/O; none of them mutate gate state directly. The
/// provider reports state changes through the broadcast channel returned by
/// [`IdentityProvider::subscribe`], delivered in causal order.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_session(&self) -> Result<Option<Identity>, ProviderError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: SecretString,
    ) -> Result<Identity, ProviderError>;

    async fn sign_up_with_password(
        &self,
        email: &str,
        password: SecretString,
    ) -> Result<Identity, ProviderError>;

    /// Returns the authorization URL the browser must be sent to.
    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &Url,
    ) -> Result<Url, ProviderError>;

    async fn exchange_code(&self, code: &str) -> Result<Identity, ProviderError>;

    async fn verify_otp(&self, token: &str, otp_type: OtpType) -> Result<Identity, ProviderError>;

    async fn update_password(&self, new_password: SecretString) -> Result<(), ProviderError>;

    async fn resend_verification(&self, email: &str) -> Result<(), ProviderError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
