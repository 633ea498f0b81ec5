//! Cache entries with absolute expiry.

use std::time::{Duration, Instant};

/// Expiry used when `now + ttl` is not representable (about 100 years).
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A cached value and the instant it stops being served.
///
/// Entries are never mutated; a refresh replaces the whole entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    /// Create an entry expiring `ttl` from now. A TTL too large to
    /// represent saturates to a far-future expiry.
    pub fn new(value: T, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self {
            value,
            created_at: now,
            expires_at,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Check if this entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check expiry against a given instant.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}
