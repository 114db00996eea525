//! Cache keys and entries.

use std::fmt;
use std::mem::size_of;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use smol_str::SmolStr;

use opsbox_core::ContentKind;

/// Key of a cached entry: `(content kind, identifier)`.
///
/// The identifier is either a document id or a query fingerprint. Keys are
/// cheap to clone (`SmolStr` inlines short ids).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: ContentKind,
    id: SmolStr,
}

impl CacheKey {
    /// Creates a key.
    pub fn new(kind: ContentKind, id: impl Into<SmolStr>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Content kind of the keyed entry.
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Identifier part of the key.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A cached payload with its content kind and expiration metadata.
///
/// The read invariant: any read finding `inserted_at + ttl` in the past must
/// report a miss, regardless of what the underlying store still holds.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    payload: Bytes,
    kind: ContentKind,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    /// Creates an entry inserted now.
    pub fn new(payload: Bytes, kind: ContentKind, ttl: Duration) -> Self {
        Self {
            payload,
            kind,
            inserted_at: Utc::now(),
            ttl,
        }
    }

    /// Reconstructs an entry from stored metadata (remote tier reads).
    pub fn from_parts(
        payload: Bytes,
        kind: ContentKind,
        inserted_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            payload,
            kind,
            inserted_at,
            ttl,
        }
    }

    /// The cached payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Content kind tag.
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Insertion timestamp.
    pub fn inserted_at(&self) -> DateTime<Utc> {
        self.inserted_at
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Instant at which the entry expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.inserted_at
            + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Whether the entry is past its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// TTL remaining at `now`; `None` once expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        let remaining = self.expires_at().signed_duration_since(now);
        remaining.to_std().ok().filter(|d| !d.is_zero())
    }

    /// Estimated memory footprint in bytes (struct overhead + payload).
    pub fn memory_size(&self) -> usize {
        size_of::<Self>() + self.payload.len()
    }

    /// Returns the entry with a shorter TTL; used by the memory tier when
    /// refilling from the remote tier.
    pub fn with_ttl_capped(mut self, cap: Duration) -> Self {
        if self.ttl > cap {
            self.ttl = cap;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_inserted_at_plus_ttl() {
        let entry = CacheEntry::new(
            Bytes::from_static(b"{}"),
            ContentKind::Runbooks,
            Duration::from_secs(60),
        );
        let now = entry.inserted_at();
        assert!(!entry.is_expired(now + chrono::Duration::seconds(59)));
        assert!(entry.is_expired(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn remaining_ttl_shrinks_and_vanishes() {
        let entry = CacheEntry::new(
            Bytes::from_static(b"{}"),
            ContentKind::General,
            Duration::from_secs(60),
        );
        let now = entry.inserted_at();
        let remaining = entry.remaining_ttl(now + chrono::Duration::seconds(30)).unwrap();
        assert!(remaining <= Duration::from_secs(30));
        assert!(entry.remaining_ttl(now + chrono::Duration::seconds(90)).is_none());
    }

    #[test]
    fn ttl_cap_only_shortens() {
        let entry = CacheEntry::new(
            Bytes::from_static(b"{}"),
            ContentKind::General,
            Duration::from_secs(60),
        );
        assert_eq!(
            entry.clone().with_ttl_capped(Duration::from_secs(30)).ttl(),
            Duration::from_secs(30)
        );
        assert_eq!(
            entry.with_ttl_capped(Duration::from_secs(600)).ttl(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn key_display() {
        let key = CacheKey::new(ContentKind::Runbooks, "rb-db-cpu");
        assert_eq!(key.to_string(), "runbooks:rb-db-cpu");
    }
}
