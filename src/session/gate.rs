//! The gate that owns one tab's session lifecycle: a single initial fetch,
//! one push-event subscription, explicit user actions, and the timers that
//! keep the loading placeholder from flashing.

use crate::provider::{AuthEvent, Identity, IdentityProvider, ProviderError};
use crate::recovery::RecoveryTracker;
use crate::routes::{RenderDecision, Route};
use crate::session::{Session, SessionStatus, SpinnerTimer};
use crate::verification::{normalize_email, valid_email};
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Anti-flicker delay before the loading placeholder becomes visible.
pub const SPINNER_DELAY: Duration = Duration::from_millis(200);

struct GateInner {
    provider: Arc<dyn IdentityProvider>,
    recovery: RecoveryTracker,
    state: watch::Sender<Session>,
}

impl GateInner {
    /// Re-derives the session from an identity snapshot. Always applied;
    /// arrival order is the only ordering the provider guarantees.
    fn apply_identity(&self, identity: Option<Identity>) {
        let recovery_active = self.recovery_active(identity.as_ref());
        self.state
            .send_replace(Session::from_identity(identity, recovery_active));
    }

    /// Applies the initial fetch result only while the status is still
    /// unresolved. A push event that arrived first wins; the fetch result
    /// is stale by then.
    fn apply_initial_fetch(&self, identity: Option<Identity>) {
        let recovery_active = self.recovery_active(identity.as_ref());
        self.state.send_if_modified(|session| {
            if session.status != SessionStatus::Unresolved {
                debug!("initial fetch resolved after a push event; discarding");
                return false;
            }
            *session = Session::from_identity(identity, recovery_active);
            true
        });
    }

    fn recovery_active(&self, identity: Option<&Identity>) -> bool {
        match identity {
            Some(identity) => self
                .recovery
                .active_intent(Utc::now(), identity.last_sign_in_at)
                .is_some(),
            None => false,
        }
    }
}

/// One gate per mounted view. Dropping (or unmounting) the gate aborts the
/// subscription task, the pending initial fetch and the spinner timer, so no
/// state update can land on a view that navigated away and no subscription
/// accumulates across navigations.
pub struct SessionGate {
    inner: Arc<GateInner>,
    spinner: SpinnerTimer,
    events_task: JoinHandle<()>,
    hydrate_task: JoinHandle<()>,
}

impl SessionGate {
    /// Subscribes to provider events, kicks off the initial session fetch
    /// and starts the anti-flicker timer. The subscription is opened before
    /// the fetch so no event can be missed in between.
    pub fn mount(provider: Arc<dyn IdentityProvider>, recovery: RecoveryTracker) -> Self {
        let (state, _) = watch::channel(Session::unresolved());
        let inner = Arc::new(GateInner {
            provider,
            recovery,
            state,
        });

        let events = inner.provider.subscribe();
        let events_task = tokio::spawn(event_loop(Arc::clone(&inner), events));
        let hydrate_task = tokio::spawn(hydrate(Arc::clone(&inner)));
        let spinner = SpinnerTimer::start(inner.state.subscribe(), SPINNER_DELAY);

        Self {
            inner,
            spinner,
            events_task,
            hydrate_task,
        }
    }

    /// Current session snapshot.
    pub fn session(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    /// Channel that yields every session change, for views that re-render
    /// reactively.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Render decision for the current route; see [`Session::resolve`].
    pub fn resolve(&self, route: &Route) -> RenderDecision {
        self.inner.state.borrow().resolve(route)
    }

    /// Whether the loading placeholder should be on screen right now:
    /// resolution is still pending and the anti-flicker delay has elapsed.
    pub fn loading_visible(&self) -> bool {
        self.spinner.is_visible()
    }

    /// Ends the session with the provider, then clears local state.
    ///
    /// The local session is never cleared before the provider answers; an
    /// optimistic clear would flash unauthenticated content and snap back if
    /// the call failed. On a real failure the session is assumed terminated
    /// provider-side anyway, so local state is still cleared and the error
    /// reported. Safe to call when already signed out.
    pub async fn sign_out(&self) -> Result<(), ProviderError> {
        let result = self.inner.provider.sign_out().await;
        if let Err(err) = &result {
            if !matches!(err, ProviderError::NotSignedIn) {
                error!("sign-out failed, clearing local session anyway: {err}");
            }
        }
        self.inner.recovery.clear();
        self.inner.apply_identity(None);
        match result {
            Err(ProviderError::NotSignedIn) => Ok(()),
            other => other,
        }
    }

    /// Sets a new password, consuming the recovery intent on success. This
    /// is the only way out of `RecoveryRequired` other than signing out.
    pub async fn update_password(&self, new_password: SecretString) -> Result<(), ProviderError> {
        self.inner.provider.update_password(new_password).await?;
        self.inner.recovery.clear();
        let identity = self.inner.state.borrow().identity.clone();
        self.inner.apply_identity(identity);
        Ok(())
    }

    /// Asks the provider to resend the verification email. Never changes
    /// the session status; failures are retryable.
    pub async fn resend_verification(&self, email: &str) -> Result<(), ProviderError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(ProviderError::InvalidEmail);
        }
        self.inner.provider.resend_verification(&email).await
    }

    /// Tears the gate down: cancels the subscription, any in-flight initial
    /// fetch and the spinner timer.
    pub fn unmount(self) {
        drop(self);
    }
}

impl Drop for SessionGate {
    fn drop(&mut self) {
        self.events_task.abort();
        self.hydrate_task.abort();
        self.spinner.cancel();
    }
}

async fn hydrate(inner: Arc<GateInner>) {
    let identity = match inner.provider.fetch_session().await {
        Ok(identity) => identity,
        Err(err) => {
            // Fail closed: an ambiguous fetch never grants access.
            warn!("initial session fetch failed, treating as signed out: {err}");
            None
        }
    };
    inner.apply_initial_fetch(identity);
}

async fn event_loop(inner: Arc<GateInner>, mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::SignedIn(identity)) | Ok(AuthEvent::TokenRefreshed(identity)) => {
                inner.apply_identity(Some(identity));
            }
            Ok(AuthEvent::SignedOut) => inner.apply_identity(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Keep the last known good status; the channel will catch up.
                warn!("auth event channel lagged, skipped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
