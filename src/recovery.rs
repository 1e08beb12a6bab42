//! Password-recovery intent tracking.
//!
//! The identity provider's token exchange is identical for "clicked a normal
//! sign-in link" and "clicked a password-reset link"; both produce an
//! ordinary session. Whether the session is a recovery session has to be
//! reconstructed from the redirect itself, so everything in this module is
//! best-effort by construction. If the provider ever exposes a first-class
//! session purpose, this module is the only thing that changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Storage key for the per-tab flag.
const INTENT_KEY: &str = "sessiongate.recovery_intent";

/// URL-sourced intents can be replayed from bookmarks or history, so they
/// get the tighter window, anchored at the session's last sign-in.
const URL_PARAM_WINDOW_SECS: i64 = 2 * 60;
/// The tab flag only exists for the duration of one recovery attempt.
const STORAGE_FLAG_WINDOW_SECS: i64 = 10 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOrigin {
    UrlParameter,
    StorageFlag,
}

/// Marker that the current session resulted from a password-recovery link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryIntent {
    pub initiated_at: DateTime<Utc>,
    pub origin: RecoveryOrigin,
}

impl RecoveryIntent {
    /// Whether the intent is still inside its validity window.
    ///
    /// URL-sourced intents expire 2 minutes after the session last
    /// authenticated (falling back to their own start time when the session
    /// has no sign-in timestamp); flag-sourced intents expire 10 minutes
    /// after they were recorded.
    pub fn is_active(&self, now: DateTime<Utc>, last_authenticated: Option<DateTime<Utc>>) -> bool {
        match self.origin {
            RecoveryOrigin::UrlParameter => {
                let anchor = last_authenticated.unwrap_or(self.initiated_at);
                now.signed_duration_since(anchor).num_seconds() <= URL_PARAM_WINDOW_SECS
            }
            RecoveryOrigin::StorageFlag => {
                now.signed_duration_since(self.initiated_at).num_seconds()
                    <= STORAGE_FLAG_WINDOW_SECS
            }
        }
    }
}

/// Per-tab ephemeral storage, the shape of `sessionStorage`. Implementations
/// must tolerate concurrent readers; the in-memory store below is enough for
/// native embeddings and tests.
pub trait TabStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryTabStore {
    entries: Mutex<HashMap<String, String>>,
}

impl TabStore for InMemoryTabStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// Detects and remembers recovery intents for the lifetime of one tab.
pub struct RecoveryTracker {
    store: Box<dyn TabStore>,
    /// Intent observed on the current document's URL; outranks the flag.
    url_intent: Mutex<Option<RecoveryIntent>>,
}

impl RecoveryTracker {
    pub fn new(store: Box<dyn TabStore>) -> Self {
        Self {
            store,
            url_intent: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryTabStore::default()))
    }

    /// Inspects a callback URL for the recovery markers (`type=recovery`
    /// from the provider, or our own `from=recovery`). A match records a
    /// URL-sourced intent and persists the tab flag so the intent survives
    /// in-tab navigation after the query string is gone.
    pub fn observe_callback_url(&self, url: &Url, now: DateTime<Utc>) -> bool {
        let marked = url.query_pairs().any(|(key, value)| {
            (key == "type" || key == "from") && value == "recovery"
        });
        if !marked {
            return false;
        }
        debug!(url = %url.path(), "recovery marker found on callback url");
        if let Ok(mut slot) = self.url_intent.lock() {
            *slot = Some(RecoveryIntent {
                initiated_at: now,
                origin: RecoveryOrigin::UrlParameter,
            });
        }
        self.persist_flag(now);
        true
    }

    /// Secondary detector inherited from the original middleware: requests
    /// arriving straight out of a mail client are likely recovery-link
    /// clicks that lost their query string along the way. Trigger conditions
    /// are heuristic and intentionally left as found.
    pub fn observe_email_client_hint(
        &self,
        referer: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        if !looks_like_email_client(referer, user_agent) {
            return false;
        }
        debug!("email-client hint matched; flagging possible recovery session");
        self.persist_flag(now);
        true
    }

    /// The active intent, if any, with expired intents treated as absent.
    /// URL-sourced detection outranks the stored flag.
    pub fn active_intent(
        &self,
        now: DateTime<Utc>,
        last_authenticated: Option<DateTime<Utc>>,
    ) -> Option<RecoveryIntent> {
        if let Ok(slot) = self.url_intent.lock() {
            if let Some(intent) = *slot {
                if intent.is_active(now, last_authenticated) {
                    return Some(intent);
                }
            }
        }
        let stored = self.store.get(INTENT_KEY)?;
        match serde_json::from_str::<RecoveryIntent>(&stored) {
            Ok(intent) if intent.is_active(now, last_authenticated) => Some(intent),
            Ok(_) => None,
            Err(err) => {
                warn!("discarding unreadable recovery flag: {err}");
                self.store.remove(INTENT_KEY);
                None
            }
        }
    }

    /// Consumes the intent once the password was changed, or when the user
    /// abandons the flow.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.url_intent.lock() {
            *slot = None;
        }
        self.store.remove(INTENT_KEY);
    }

    fn persist_flag(&self, now: DateTime<Utc>) {
        let flag = RecoveryIntent {
            initiated_at: now,
            origin: RecoveryOrigin::StorageFlag,
        };
        match serde_json::to_string(&flag) {
            Ok(json) => self.store.set(INTENT_KEY, &json),
            Err(err) => warn!("failed to persist recovery flag: {err}"),
        }
    }
}

/// Referer/user-agent sniff for mail clients. Over- and under-matching are
/// both possible; see the tracker docs.
pub fn looks_like_email_client(referer: Option<&str>, user_agent: Option<&str>) -> bool {
    const MAIL_REFERERS: [&str; 4] = ["mail.google.com", "outlook.live.com", "outlook.office.com", "mail.yahoo.com"];
    const MAIL_AGENTS: [&str; 3] = ["Thunderbird", "Outlook", "Mailspring"];

    if let Some(referer) = referer {
        let referer = referer.to_lowercase();
        if MAIL_REFERERS.iter().any(|host| referer.contains(host)) {
            return true;
        }
    }
    if let Some(agent) = user_agent {
        if MAIL_AGENTS.iter().any(|needle| agent.contains(needle)) {
            return true;
        }
    }
    false
}
