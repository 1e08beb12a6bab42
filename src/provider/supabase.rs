//! Supabase GoTrue client implementing [`IdentityProvider`]. One instance is
//! constructed at application startup and handed to the gate; there is no
//! module-level cached client. The access token lives in memory only and is
//! emitted to subscribers as auth events after each successful call.

use crate::config::Config;
use crate::provider::{AuthEvent, Identity, IdentityProvider, OtpType, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Capacity of the auth-event channel; slow subscribers lag rather than
/// block the provider.
const EVENT_CAPACITY: usize = 16;

pub struct SupabaseProvider {
    http: Client,
    base: String,
    anon_key: SecretString,
    access_token: RwLock<Option<SecretString>>,
    events: broadcast::Sender<AuthEvent>,
}

/// GoTrue user record, reduced to the fields the gate cares about.
#[derive(Debug, Deserialize)]
struct UserPayload {
    id: Uuid,
    email: Option<String>,
    email_confirmed_at: Option<DateTime<Utc>>,
    last_sign_in_at: Option<DateTime<Utc>>,
    app_metadata: Option<AppMetadata>,
}

#[derive(Debug, Deserialize)]
struct AppMetadata {
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    access_token: String,
    user: UserPayload,
}

impl UserPayload {
    fn into_identity(self) -> Identity {
        let provider = self
            .app_metadata
            .and_then(|metadata| metadata.provider)
            .unwrap_or_else(|| "email".to_string());
        Identity {
            user_id: self.id,
            email: self.email.unwrap_or_default(),
            provider,
            email_confirmed_at: self.email_confirmed_at,
            last_sign_in_at: self.last_sign_in_at,
        }
    }
}

impl SupabaseProvider {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.request_timeout())
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            http,
            base: config.url().as_str().trim_end_matches('/').to_string(),
            anon_key: config.anon_key().clone(),
            access_token: RwLock::new(None),
            events,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{path}", self.base)
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder, ProviderError> {
        let guard = self
            .access_token
            .read()
            .map_err(|_| ProviderError::Decode("token lock poisoned".to_string()))?;
        let token = guard.as_ref().ok_or(ProviderError::NotSignedIn)?;
        Ok(request.bearer_auth(token.expose_secret()))
    }

    fn apikey(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", self.anon_key.expose_secret())
    }

    fn store_token(&self, token: &str) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = Some(SecretString::from(token.to_string()));
        }
    }

    fn clear_token(&self) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = None;
        }
    }

    fn has_token(&self) -> bool {
        self.access_token
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine; the gate may not be mounted yet.
        let _ = self.events.send(event);
    }

    /// Stores the session token and announces the sign-in.
    fn adopt_session(&self, session: SessionPayload) -> Identity {
        self.store_token(&session.access_token);
        let identity = session.user.into_identity();
        self.emit(AuthEvent::SignedIn(identity.clone()));
        identity
    }

    async fn session_from(&self, response: Response) -> Result<Identity, ProviderError> {
        let session: SessionPayload = checked(response)
            .await?
            .json()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        Ok(self.adopt_session(session))
    }
}

/// Converts a non-success response into [`ProviderError::Http`], pulling the
/// human-readable message out of whichever field GoTrue used this time.
async fn checked(response: Response) -> Result<Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = match response.json::<Value>().await {
        Ok(body) => ["error_description", "msg", "message", "error"]
            .iter()
            .find_map(|key| body[key].as_str().map(str::to_string))
            .unwrap_or_else(|| body.to_string()),
        Err(_) => String::new(),
    };
    Err(ProviderError::Http { status, message })
}

fn transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(err)
    }
}

#[async_trait]
impl IdentityProvider for SupabaseProvider {
    /// `Ok(None)` covers both "never signed in" and "token no longer
    /// accepted"; the caller cannot tell them apart and should not.
    #[instrument(skip_all)]
    async fn fetch_session(&self) -> Result<Option<Identity>, ProviderError> {
        if !self.has_token() {
            return Ok(None);
        }
        let request = self.apikey(self.http.get(self.endpoint("/user")));
        let response = self.authed(request)?.send().await.map_err(transport)?;
        if response.status().as_u16() == 401 || response.status().as_u16() == 403 {
            debug!("stored token rejected; treating as signed out");
            self.clear_token();
            return Ok(None);
        }
        let user: UserPayload = checked(response)
            .await?
            .json()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        Ok(Some(user.into_identity()))
    }

    #[instrument(skip_all)]
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: SecretString,
    ) -> Result<Identity, ProviderError> {
        let payload = json!({
            "email": email,
            "password": password.expose_secret(),
        });
        let url = format!("{}?grant_type=password", self.endpoint("/token"));
        let response = self
            .apikey(self.http.post(url))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        self.session_from(response).await
    }

    #[instrument(skip_all)]
    async fn sign_up_with_password(
        &self,
        email: &str,
        password: SecretString,
    ) -> Result<Identity, ProviderError> {
        let payload = json!({
            "email": email,
            "password": password.expose_secret(),
        });
        let response = self
            .apikey(self.http.post(self.endpoint("/signup")))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        let body: Value = checked(response)
            .await?
            .json()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        // With autoconfirm enabled the signup already carries a session;
        // otherwise only the pending user record comes back.
        if body.get("access_token").is_some() {
            let session: SessionPayload = serde_json::from_value(body)
                .map_err(|err| ProviderError::Decode(err.to_string()))?;
            return Ok(self.adopt_session(session));
        }
        let user: UserPayload = serde_json::from_value(body)
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        Ok(user.into_identity())
    }

    /// Builds the authorization URL the browser must navigate to; no HTTP
    /// round trip happens here.
    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_to: &Url,
    ) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.endpoint("/authorize"))
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<Identity, ProviderError> {
        let payload = json!({ "auth_code": code });
        let url = format!("{}?grant_type=pkce", self.endpoint("/token"));
        let response = self
            .apikey(self.http.post(url))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        self.session_from(response).await
    }

    #[instrument(skip_all, fields(otp_type = otp_type.as_str()))]
    async fn verify_otp(&self, token: &str, otp_type: OtpType) -> Result<Identity, ProviderError> {
        let payload = json!({
            "token_hash": token,
            "type": otp_type.as_str(),
        });
        let response = self
            .apikey(self.http.post(self.endpoint("/verify")))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        self.session_from(response).await
    }

    #[instrument(skip_all)]
    async fn update_password(&self, new_password: SecretString) -> Result<(), ProviderError> {
        let payload = json!({ "password": new_password.expose_secret() });
        let request = self.apikey(self.http.put(self.endpoint("/user")));
        let response = self
            .authed(request)?
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        checked(response).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn resend_verification(&self, email: &str) -> Result<(), ProviderError> {
        let payload = json!({ "email": email, "type": "signup" });
        let response = self
            .apikey(self.http.post(self.endpoint("/resend")))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        checked(response).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let payload = json!({ "email": email });
        let response = self
            .apikey(self.http.post(self.endpoint("/recover")))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        checked(response).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn sign_out(&self) -> Result<(), ProviderError> {
        if !self.has_token() {
            return Err(ProviderError::NotSignedIn);
        }
        let request = self.apikey(self.http.post(self.endpoint("/logout")));
        let result = self.authed(request)?.send().await;
        // Locally the session ends regardless; the token is gone either way.
        self.clear_token();
        self.emit(AuthEvent::SignedOut);
        let response = result.map_err(transport)?;
        checked(response).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
