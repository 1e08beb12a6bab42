//! Runtime configuration for the identity provider client. Values come from
//! the environment so static deployments can point at another project
//! without rebuilding. The anon key is publishable but still wrapped in
//! `SecretString` to keep it out of logs.

use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

const ENV_URL: &str = "SUPABASE_URL";
const ENV_ANON_KEY: &str = "SUPABASE_ANON_KEY";

/// Default per-request timeout for provider calls.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct Config {
    url: Url,
    anon_key: SecretString,
    request_timeout: Duration,
}

impl Config {
    pub fn new(url: Url, anon_key: SecretString) -> Self {
        Self {
            url,
            anon_key,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Loads configuration from `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    pub fn from_env() -> Result<Self> {
        let raw_url = std::env::var(ENV_URL).with_context(|| format!("{ENV_URL} is not set"))?;
        let url = parse_base_url(&raw_url)?;

        let anon_key = std::env::var(ENV_ANON_KEY)
            .with_context(|| format!("{ENV_ANON_KEY} is not set"))?
            .trim()
            .to_string();
        if anon_key.is_empty() {
            return Err(anyhow!("{ENV_ANON_KEY} is empty"));
        }

        Ok(Self::new(url, SecretString::from(anon_key)))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn anon_key(&self) -> &SecretString {
        &self.anon_key
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid {ENV_URL}: {raw}"))?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(anyhow!("unsupported {ENV_URL} scheme: {}", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err(anyhow!("{ENV_URL} has no host"));
    }
    Ok(url)
}
