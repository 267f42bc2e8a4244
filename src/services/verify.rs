//! Background token re-verification.
//!
//! DESIGN
//! ======
//! Each live token gets at most one task that calls `/verify` right away and
//! then once per interval until the token's own expiry. A failed or non-`OK`
//! verification marks the token revoked and ends the task; the next request
//! carrying that token is treated as logged out. Revoked entries are kept
//! only until the token would have expired anyway.
//!
//! LIFECYCLE
//! =========
//! Tasks are cancelled per token on logout and all at once through
//! [`VerificationRegistry::shutdown`]. Every task token is a child of the
//! registry's shutdown token, so a single cancel reaches all of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::AuthService;
use super::response::{ServiceResponse, StatusMachine};
use crate::session::token_fingerprint;

struct Watch {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryInner {
    watches: HashMap<String, Watch>,
    /// Revoked tokens and the expiry after which the entry can be dropped.
    revoked: HashMap<String, OffsetDateTime>,
    next_id: u64,
}

impl RegistryInner {
    fn prune_revoked(&mut self, now: OffsetDateTime) {
        self.revoked.retain(|_, expiry| *expiry > now);
    }
}

/// Tracks the re-verification task of every live token.
#[derive(Clone)]
pub struct VerificationRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    shutdown: CancellationToken,
    interval: Duration,
}

impl VerificationRegistry {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(RegistryInner::default())), shutdown: CancellationToken::new(), interval }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start re-verifying `token` until `expiry`, unless it is already
    /// watched, revoked or expired. Returns `true` when a new task was spawned.
    pub fn watch(&self, token: &str, expiry: OffsetDateTime, service: Arc<dyn AuthService>) -> bool {
        let now = OffsetDateTime::now_utc();
        let Ok(remaining) = Duration::try_from(expiry - now) else {
            return false;
        };
        if remaining.is_zero() {
            return false;
        }

        let (id, cancel) = {
            let mut inner = self.lock();
            inner.prune_revoked(now);
            if self.shutdown.is_cancelled() || inner.watches.contains_key(token) || inner.revoked.contains_key(token) {
                return false;
            }
            let cancel = self.shutdown.child_token();
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .watches
                .insert(token.to_owned(), Watch { id, cancel: cancel.clone() });
            (id, cancel)
        };

        let registry = self.clone();
        let token = token.to_owned();
        let interval = self.interval;
        let deadline = Instant::now() + remaining;
        debug!(token = %token_fingerprint(&token), interval_secs = interval.as_secs(), "token verification started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(token = %token_fingerprint(&token), "token verification cancelled");
                        break;
                    }
                    () = tokio::time::sleep_until(deadline) => {
                        debug!(token = %token_fingerprint(&token), "token expired; verification stopped");
                        registry.finish(&token, id);
                        break;
                    }
                    _ = ticker.tick() => {
                        if !verify_once(service.as_ref(), &token).await {
                            registry.revoke(&token, id, expiry);
                            break;
                        }
                    }
                }
            }
        });
        true
    }

    #[must_use]
    pub fn is_revoked(&self, token: &str) -> bool {
        self.lock().revoked.contains_key(token)
    }

    #[must_use]
    pub fn is_watching(&self, token: &str) -> bool {
        self.lock().watches.contains_key(token)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().watches.len()
    }

    #[must_use]
    pub fn revoked_count(&self) -> usize {
        self.lock().revoked.len()
    }

    /// Drop revoked entries whose token expired before `now`.
    pub fn prune_expired(&self, now: OffsetDateTime) {
        self.lock().prune_revoked(now);
    }

    /// Stop watching `token` and forget it. Used on logout.
    pub fn cancel(&self, token: &str) {
        let mut inner = self.lock();
        if let Some(watch) = inner.watches.remove(token) {
            watch.cancel.cancel();
        }
        inner.revoked.remove(token);
    }

    /// Clear a revocation after the auth service verified `token` again.
    pub fn reinstate(&self, token: &str) {
        if self.lock().revoked.remove(token).is_some() {
            info!(token = %token_fingerprint(token), "revoked token reinstated after verification");
        }
    }

    /// Cancel every task. Later [`watch`](Self::watch) calls are ignored.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut inner = self.lock();
        let count = inner.watches.len();
        inner.watches.clear();
        info!(count, "token verification stopped");
    }

    /// Remove the watch entry, unless a newer task already replaced it.
    fn finish(&self, token: &str, id: u64) -> bool {
        let mut inner = self.lock();
        if inner.watches.get(token).is_some_and(|w| w.id == id) {
            inner.watches.remove(token);
            return true;
        }
        false
    }

    fn revoke(&self, token: &str, id: u64, expiry: OffsetDateTime) {
        if !self.finish(token, id) {
            return;
        }
        let mut inner = self.lock();
        inner.prune_revoked(OffsetDateTime::now_utc());
        inner.revoked.insert(token.to_owned(), expiry);
        info!(token = %token_fingerprint(token), "token revoked after failed verification");
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One `/verify` round trip. `true` only for a reply with status `OK`.
pub(crate) async fn verify_once(service: &dyn AuthService, token: &str) -> bool {
    let raw = match service.verify(token).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, token = %token_fingerprint(token), "failed to verify token");
            return false;
        }
    };

    match ServiceResponse::validate(raw, false) {
        Ok(response) if response.status() == StatusMachine::Ok => true,
        Ok(response) => {
            warn!(status = %response.status(), message = response.message(), "token no longer valid");
            false
        }
        Err(e) => {
            warn!(error = %e, "token rejected by auth service");
            false
        }
    }
}

#[cfg(test)]
#[path = "verify_test.rs"]
mod tests;
