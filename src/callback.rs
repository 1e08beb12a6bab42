//! Auth-callback processing: turning the redirect from an OAuth consent
//! screen or an email link into a session, under a hard time ceiling. Every
//! failure here must end somewhere actionable (retry, new link, or back to
//! login); nobody gets left on a spinner.

use crate::provider::{Identity, IdentityProvider, OtpType, ProviderError};
use crate::recovery::RecoveryTracker;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

/// Ceiling for the whole exchange; past this the user gets a timeout error
/// and a redirect to login instead of a hung spinner.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause before the post-failure redirect so the message is readable.
pub const LOGIN_REDIRECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackFlow {
    OAuthCode,
    OneTimeCode,
}

/// What was found on the callback URL.
#[derive(Clone, Debug, PartialEq, Eq)]
enum CallbackRequest {
    OAuthCode { code: String },
    OneTimeCode { token: String, otp_type: OtpType },
}

/// Fixed diagnostic record for one callback attempt. Fields are optional
/// per step rather than an open-ended bag of properties.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CallbackDiagnostics {
    pub flow: Option<CallbackFlow>,
    pub recovery_marked: bool,
    pub exchange_ms: Option<u64>,
    pub timed_out: bool,
    pub provider_status: Option<u16>,
    pub failure: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallbackFailure {
    #[error("the link has expired")]
    ExpiredLink,
    #[error("the link has already been used")]
    AlreadyUsed,
    #[error("the email is already verified")]
    AlreadyVerified,
    #[error("the exchange timed out")]
    Timeout,
    #[error("the callback url carries no code or token")]
    MissingCode,
    #[error("the exchange failed: {0}")]
    Other(String),
}

/// Where the UI should send the user after a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureAdvice {
    /// Inline message; the user can retry immediately.
    Retry,
    /// Offer to request a fresh link/email.
    RequestNewLink,
    /// Offer the login page (e.g. the account is already verified).
    OfferLogin,
    /// Show the message, then redirect to login after
    /// [`LOGIN_REDIRECT_DELAY`].
    RedirectToLogin,
}

impl CallbackFailure {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ExpiredLink => "This link has expired. Please request a new one.",
            Self::AlreadyUsed => "This link has already been used. Please request a new one.",
            Self::AlreadyVerified => "Your email is already verified. You can sign in.",
            Self::Timeout => "Signing you in took too long. Please try again.",
            Self::MissingCode => "This link is incomplete. Please request a new one.",
            Self::Other(_) => "We could not sign you in. Please try again.",
        }
    }

    pub fn advice(&self) -> FailureAdvice {
        match self {
            Self::ExpiredLink | Self::MissingCode => FailureAdvice::RequestNewLink,
            Self::AlreadyUsed | Self::Timeout => FailureAdvice::RedirectToLogin,
            Self::AlreadyVerified => FailureAdvice::OfferLogin,
            Self::Other(_) => FailureAdvice::Retry,
        }
    }
}

/// A successfully established session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub identity: Identity,
    /// The session came from a recovery link; send the user to the
    /// password-reset page, not the content.
    pub recovery: bool,
}

#[derive(Debug)]
pub struct CallbackReport {
    pub outcome: Result<CallbackOutcome, CallbackFailure>,
    pub diagnostics: CallbackDiagnostics,
}

/// Processes one callback URL end to end: detect the recovery marker,
/// exchange the code or verify the one-time token (bounded by
/// [`CALLBACK_TIMEOUT`]), and classify any failure into user-facing copy.
pub async fn process_callback(
    provider: &dyn IdentityProvider,
    recovery: &RecoveryTracker,
    url: &Url,
) -> CallbackReport {
    let mut diagnostics = CallbackDiagnostics {
        recovery_marked: recovery.observe_callback_url(url, Utc::now()),
        ..CallbackDiagnostics::default()
    };

    let request = match parse_callback(url) {
        Some(request) => request,
        None => {
            diagnostics.failure = Some(CallbackFailure::MissingCode.to_string());
            return CallbackReport {
                outcome: Err(CallbackFailure::MissingCode),
                diagnostics,
            };
        }
    };
    diagnostics.flow = Some(match &request {
        CallbackRequest::OAuthCode { .. } => CallbackFlow::OAuthCode,
        CallbackRequest::OneTimeCode { .. } => CallbackFlow::OneTimeCode,
    });

    let started = tokio::time::Instant::now();
    let exchange = async {
        match &request {
            CallbackRequest::OAuthCode { code } => provider.exchange_code(code).await,
            CallbackRequest::OneTimeCode { token, otp_type } => {
                provider.verify_otp(token, *otp_type).await
            }
        }
    };

    let result = tokio::time::timeout(CALLBACK_TIMEOUT, exchange).await;
    diagnostics.exchange_ms = Some(started.elapsed().as_millis() as u64);

    let outcome = match result {
        Err(_elapsed) => {
            diagnostics.timed_out = true;
            warn!("callback exchange exceeded {CALLBACK_TIMEOUT:?}");
            Err(CallbackFailure::Timeout)
        }
        Ok(Err(err)) => {
            if let ProviderError::Http { status, .. } = &err {
                diagnostics.provider_status = Some(*status);
            }
            let failure = classify_exchange_error(&err);
            warn!("callback exchange failed: {err}");
            Err(failure)
        }
        Ok(Ok(identity)) => {
            info!(user = %identity.user_id, "callback exchange established a session");
            Ok(CallbackOutcome {
                identity,
                recovery: diagnostics.recovery_marked,
            })
        }
    };

    if let Err(failure) = &outcome {
        diagnostics.failure = Some(failure.to_string());
    }
    CallbackReport {
        outcome,
        diagnostics,
    }
}

/// Extracts the exchangeable credential from the callback URL. OAuth
/// redirects carry `code`; email links carry `token_hash` (or legacy
/// `token`) plus a `type`.
fn parse_callback(url: &Url) -> Option<CallbackRequest> {
    let mut code = None;
    let mut token = None;
    let mut otp_type = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "token_hash" | "token" => token = Some(value.into_owned()),
            "type" => otp_type = parse_otp_type(&value),
            _ => {}
        }
    }
    if let Some(code) = code {
        return Some(CallbackRequest::OAuthCode { code });
    }
    token.map(|token| CallbackRequest::OneTimeCode {
        token,
        otp_type: otp_type.unwrap_or(OtpType::Email),
    })
}

fn parse_otp_type(raw: &str) -> Option<OtpType> {
    match raw {
        "signup" => Some(OtpType::Signup),
        "recovery" => Some(OtpType::Recovery),
        "magiclink" => Some(OtpType::MagicLink),
        "email" => Some(OtpType::Email),
        _ => None,
    }
}

/// Maps the provider's error body onto the user-facing taxonomy. The
/// provider reports these as free-form messages, so this is keyword
/// matching by necessity.
fn classify_exchange_error(err: &ProviderError) -> CallbackFailure {
    let Some(message) = err.provider_message() else {
        return CallbackFailure::Other(err.to_string());
    };
    let message_lower = message.to_lowercase();
    if message_lower.contains("already been used") {
        CallbackFailure::AlreadyUsed
    } else if message_lower.contains("already confirmed") || message_lower.contains("already verified")
    {
        CallbackFailure::AlreadyVerified
    } else if message_lower.contains("expired") || message_lower.contains("invalid") {
        CallbackFailure::ExpiredLink
    } else {
        CallbackFailure::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        classify_exchange_error, parse_callback, process_callback, CallbackFailure,
        CallbackFlow, CallbackRequest, FailureAdvice, CALLBACK_TIMEOUT,
    };
    use crate::provider::{AuthEvent, Identity, IdentityProvider, OtpType, ProviderError};
    use crate::recovery::RecoveryTracker;
    use async_trait::async_trait;
    use chrono::Utc;
    use secrecy::SecretString;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use url::Url;
    use uuid::Uuid;

    struct ExchangeProvider {
        response: Result<Identity, ProviderError>,
        delay: Duration,
        events: broadcast::Sender<AuthEvent>,
    }

    impl ExchangeProvider {
        fn new(response: Result<Identity, ProviderError>) -> Self {
            let (events, _) = broadcast::channel(4);
            Self {
                response,
                delay: Duration::ZERO,
                events,
            }
        }

        fn slow(response: Result<Identity, ProviderError>, delay: Duration) -> Self {
            let mut provider = Self::new(response);
            provider.delay = delay;
            provider
        }

        fn respond(&self) -> Result<Identity, ProviderError> {
            match &self.response {
                Ok(identity) => Ok(identity.clone()),
                Err(ProviderError::Http { status, message }) => Err(ProviderError::Http {
                    status: *status,
                    message: message.clone(),
                }),
                Err(_) => Err(ProviderError::NotSignedIn),
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for ExchangeProvider {
        async fn fetch_session(&self) -> Result<Option<Identity>, ProviderError> {
            Ok(None)
        }

        async fn sign_in_with_password(
            &self,
            _email: &str,
            _password: SecretString,
        ) -> Result<Identity, ProviderError> {
            Err(ProviderError::NotSignedIn)
        }

        async fn sign_up_with_password(
            &self,
            _email: &str,
            _password: SecretString,
        ) -> Result<Identity, ProviderError> {
            Err(ProviderError::NotSignedIn)
        }

        async fn sign_in_with_oauth(
            &self,
            _provider: &str,
            redirect_to: &Url,
        ) -> Result<Url, ProviderError> {
            Ok(redirect_to.clone())
        }

        async fn exchange_code(&self, _code: &str) -> Result<Identity, ProviderError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.respond()
        }

        async fn verify_otp(
            &self,
            _token: &str,
            _otp_type: OtpType,
        ) -> Result<Identity, ProviderError> {
            self.respond()
        }

        async fn update_password(&self, _new_password: SecretString) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn resend_verification(&self, _email: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn send_password_reset(&self, _email: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn sign_out(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
            self.events.subscribe()
        }
    }

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            email: "reader@example.com".to_string(),
            provider: "email".to_string(),
            email_confirmed_at: Some(Utc::now()),
            last_sign_in_at: Some(Utc::now()),
        }
    }

    #[test]
    fn parse_callback_prefers_oauth_code() {
        let url = Url::parse("https://site.example/auth/callback?code=abc").unwrap();
        assert_eq!(
            parse_callback(&url),
            Some(CallbackRequest::OAuthCode {
                code: "abc".to_string()
            })
        );

        let url =
            Url::parse("https://site.example/auth/callback?token_hash=xyz&type=signup").unwrap();
        assert_eq!(
            parse_callback(&url),
            Some(CallbackRequest::OneTimeCode {
                token: "xyz".to_string(),
                otp_type: OtpType::Signup,
            })
        );

        let url = Url::parse("https://site.example/auth/callback").unwrap();
        assert_eq!(parse_callback(&url), None);
    }

    #[test]
    fn classification_distinguishes_used_expired_and_generic() {
        let used = ProviderError::Http {
            status: 403,
            message: "Authorization code has already been used".to_string(),
        };
        assert_eq!(classify_exchange_error(&used), CallbackFailure::AlreadyUsed);

        let expired = ProviderError::Http {
            status: 403,
            message: "Email link is invalid or has expired".to_string(),
        };
        assert_eq!(
            classify_exchange_error(&expired),
            CallbackFailure::ExpiredLink
        );

        let verified = ProviderError::Http {
            status: 400,
            message: "User already confirmed".to_string(),
        };
        assert_eq!(
            classify_exchange_error(&verified),
            CallbackFailure::AlreadyVerified
        );

        let generic = ProviderError::Timeout;
        assert!(matches!(
            classify_exchange_error(&generic),
            CallbackFailure::Other(_)
        ));
    }

    #[tokio::test]
    async fn already_used_link_gets_the_exact_copy_and_a_login_redirect() {
        let provider = ExchangeProvider::new(Err(ProviderError::Http {
            status: 403,
            message: "Authorization code has already been used".to_string(),
        }));
        let recovery = RecoveryTracker::in_memory();
        let url = Url::parse("https://site.example/auth/callback?code=abc").unwrap();

        let report = process_callback(&provider, &recovery, &url).await;
        let failure = report.outcome.expect_err("exchange must fail");
        assert_eq!(failure, CallbackFailure::AlreadyUsed);
        assert_eq!(
            failure.user_message(),
            "This link has already been used. Please request a new one."
        );
        assert_eq!(failure.advice(), FailureAdvice::RedirectToLogin);
        assert_eq!(report.diagnostics.provider_status, Some(403));
    }

    #[tokio::test]
    async fn successful_recovery_callback_flags_the_session() {
        let provider = ExchangeProvider::new(Ok(identity()));
        let recovery = RecoveryTracker::in_memory();
        let url =
            Url::parse("https://site.example/auth/callback?code=abc&type=recovery").unwrap();

        let report = process_callback(&provider, &recovery, &url).await;
        let outcome = report.outcome.expect("exchange succeeds");
        assert!(outcome.recovery);
        assert_eq!(report.diagnostics.flow, Some(CallbackFlow::OAuthCode));
        assert!(recovery.active_intent(Utc::now(), Some(Utc::now())).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_past_the_ceiling_times_out() {
        let provider =
            ExchangeProvider::slow(Ok(identity()), CALLBACK_TIMEOUT + Duration::from_secs(5));
        let recovery = RecoveryTracker::in_memory();
        let url = Url::parse("https://site.example/auth/callback?code=abc").unwrap();

        let report = process_callback(&provider, &recovery, &url).await;
        assert_eq!(report.outcome.expect_err("must time out"), CallbackFailure::Timeout);
        assert!(report.diagnostics.timed_out);
    }

    #[tokio::test]
    async fn bare_callback_url_is_rejected() {
        let provider = ExchangeProvider::new(Ok(identity()));
        let recovery = RecoveryTracker::in_memory();
        let url = Url::parse("https://site.example/auth/callback").unwrap();

        let report = process_callback(&provider, &recovery, &url).await;
        assert_eq!(
            report.outcome.expect_err("nothing to exchange"),
            CallbackFailure::MissingCode
        );
        assert_eq!(report.diagnostics.flow, None);
    }
}
