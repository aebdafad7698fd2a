//! Time-boxed ticket cache with one in-flight fetch per key.
//!
//! Staleness is decided by the cache's own TTL measured from the moment a
//! ticket was stored. The ticket's server-declared expiration is only
//! consulted when [`TicketCache::with_ticket_expiration`] is enabled, in
//! which case whichever of the two comes first wins.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::wsaa::AuthorizationTicket;

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    ticket: AuthorizationTicket,
    stored_at: DateTime<Utc>,
}

type Slot = Arc<tokio::sync::Mutex<Option<CacheEntry>>>;

/// Process-local store of tickets keyed by `{prefix}-{service}`.
pub struct TicketCache {
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Slot>>,
    respect_ticket_expiration: bool,
}

impl Default for TicketCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl TicketCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slots: Mutex::new(HashMap::new()),
            respect_ticket_expiration: false,
        }
    }

    /// Also treat a ticket as absent once its parsed expiration has passed.
    pub fn with_ticket_expiration(mut self, respect: bool) -> Self {
        self.respect_ticket_expiration = respect;
        self
    }

    /// Return the ticket stored under `key` if it is younger than `ttl`,
    /// otherwise run `fetch`, store its result, and return it.
    ///
    /// Concurrent callers for the same key wait for the in-flight fetch
    /// instead of starting their own. A failed fetch stores nothing and its
    /// error is returned as is.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<AuthorizationTicket, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AuthorizationTicket, E>>,
        E: std::fmt::Display,
    {
        let slot = self.slot(key);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref() {
            if self.is_fresh(cached, ttl) {
                tracing::debug!(key, "ticket cache hit");
                return Ok(cached.ticket.clone());
            }
            tracing::debug!(key, stored_at = %cached.stored_at, "ticket cache entry expired");
        } else {
            tracing::debug!(key, "ticket cache miss");
        }
        *entry = None;

        match fetch().await {
            Ok(ticket) => {
                let stored_at = self.clock.now();
                tracing::debug!(key, %stored_at, "ticket stored");
                *entry = Some(CacheEntry {
                    ticket: ticket.clone(),
                    stored_at,
                });
                Ok(ticket)
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "ticket fetch failed");
                Err(err)
            }
        }
    }

    /// Drop the ticket stored under `key`, waiting for any in-flight fetch.
    pub async fn invalidate(&self, key: &str) {
        let slot = self.slots.lock().get(key).cloned();
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
    }

    /// Forget every key. In-flight fetches finish into detached slots.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    fn slot(&self, key: &str) -> Slot {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn is_fresh(&self, entry: &CacheEntry, ttl: Duration) -> bool {
        let now = self.clock.now();
        let within_ttl = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(entry.stored_at) < ttl,
            Err(_) => true,
        };
        if !within_ttl {
            return false;
        }
        if self.respect_ticket_expiration {
            if let Some(expires_at) = entry.ticket.expires_at() {
                return now < expires_at;
            }
        }
        true
    }
}

impl std::fmt::Debug for TicketCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketCache")
            .field("keys", &self.slots.lock().len())
            .field("respect_ticket_expiration", &self.respect_ticket_expiration)
            .finish()
    }
}
