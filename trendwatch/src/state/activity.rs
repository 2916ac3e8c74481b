// trendwatch/src/state/activity.rs
//
// Recent-activity index: which (entity, language) pairs saw any use within
// the last TTL. Refresh scans it to find cold-start candidates that hold no
// TrendRecord yet.
//
// Key layout in the expiring set:
//   {kind}:{entity}:{language}
// Entities may contain ':' (URLs); languages never do, so keys are split on
// the first and last separator.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::Result;
use crate::events::{EntityKind, TrendKey};

/// Expiring-set collaborator (a Redis sorted set in a typical deployment).
pub trait ExpiringSetStore: Send + Sync {
    fn touch(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> Result<()>;
    /// Keys starting with `prefix` that have not expired as of `at`.
    fn scan_active(&self, prefix: &str, at: DateTime<Utc>) -> Result<Vec<String>>;
    fn purge_expired(&self, at: DateTime<Utc>) -> Result<usize>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_seen:  DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryExpiringSet {
    entries: DashMap<String, Entry>,
}

impl MemoryExpiringSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|e| e.last_seen)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ExpiringSetStore for MemoryExpiringSet {
    fn touch(&self, key: &str, at: DateTime<Utc>, ttl: Duration) -> Result<()> {
        let mut entry = self.entries
            .entry(key.to_string())
            .or_insert(Entry { last_seen: at, expires_at: at + ttl });
        // out-of-order events never move an entry backwards
        if at >= entry.last_seen {
            entry.last_seen  = at;
            entry.expires_at = at + ttl;
        }
        Ok(())
    }

    fn scan_active(&self, prefix: &str, at: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self.entries.iter()
            .filter(|e| e.key().starts_with(prefix) && e.value().expires_at > at)
            .map(|e| e.key().clone())
            .collect())
    }

    fn purge_expired(&self, at: DateTime<Utc>) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > at);
        Ok(before - self.entries.len())
    }
}

// ── Index view ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RecentActivityIndex {
    store: Arc<dyn ExpiringSetStore>,
    kind:  EntityKind,
    ttl:   Duration,
}

impl RecentActivityIndex {
    pub fn new(store: Arc<dyn ExpiringSetStore>, kind: EntityKind, ttl: Duration) -> Self {
        Self { store, kind, ttl }
    }

    fn prefix(&self) -> String {
        format!("{}:", self.kind)
    }

    pub fn key_for(&self, key: &TrendKey) -> String {
        format!("{}{}:{}", self.prefix(), key.entity, key.language)
    }

    pub fn mark(&self, key: &TrendKey, at: DateTime<Utc>) -> Result<()> {
        self.store.touch(&self.key_for(key), at, self.ttl)
    }

    /// Every pair active as of `at`, sorted for stable batching.
    pub fn active(&self, at: DateTime<Utc>) -> Result<Vec<TrendKey>> {
        let prefix = self.prefix();
        let mut keys: Vec<TrendKey> = self.store
            .scan_active(&prefix, at)?
            .into_iter()
            .filter_map(|raw| {
                let rest = raw.strip_prefix(&prefix)?;
                let (entity, language) = rest.rsplit_once(':')?;
                if entity.is_empty() || language.is_empty() { return None; }
                Some(TrendKey { entity: entity.to_string(), language: language.to_string() })
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn purge_expired(&self, at: DateTime<Utc>) -> Result<usize> {
        self.store.purge_expired(at)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn index(kind: EntityKind) -> (RecentActivityIndex, Arc<MemoryExpiringSet>) {
        let store = Arc::new(MemoryExpiringSet::new());
        (RecentActivityIndex::new(store.clone(), kind, Duration::days(1)), store)
    }

    #[test]
    fn marked_pairs_are_active_until_ttl() {
        let (idx, _) = index(EntityKind::Tag);
        let key = TrendKey::new("rust", Some("en"));
        idx.mark(&key, t0()).unwrap();

        assert_eq!(idx.active(t0() + Duration::hours(23)).unwrap(), vec![key]);
        assert!(idx.active(t0() + Duration::days(1)).unwrap().is_empty());
    }

    #[test]
    fn touch_refreshes_last_seen() {
        let (idx, store) = index(EntityKind::Tag);
        let key = TrendKey::new("rust", Some("en"));
        idx.mark(&key, t0()).unwrap();
        idx.mark(&key, t0() + Duration::hours(20)).unwrap();

        assert_eq!(store.last_seen("tags:rust:en"), Some(t0() + Duration::hours(20)));
        assert_eq!(idx.active(t0() + Duration::hours(30)).unwrap().len(), 1);
    }

    #[test]
    fn link_keys_with_colons_round_trip() {
        let (idx, _) = index(EntityKind::Link);
        let key = TrendKey::new("https://example.com:8443/a", Some("fr"));
        idx.mark(&key, t0()).unwrap();
        assert_eq!(idx.active(t0()).unwrap(), vec![key]);
    }

    #[test]
    fn kinds_do_not_see_each_other() {
        let store = Arc::new(MemoryExpiringSet::new());
        let tags  = RecentActivityIndex::new(store.clone(), EntityKind::Tag, Duration::days(1));
        let links = RecentActivityIndex::new(store.clone(), EntityKind::Link, Duration::days(1));
        tags.mark(&TrendKey::new("rust", None), t0()).unwrap();

        assert_eq!(tags.active(t0()).unwrap().len(), 1);
        assert!(links.active(t0()).unwrap().is_empty());
    }

    #[test]
    fn purge_removes_expired_entries() {
        let (idx, store) = index(EntityKind::Tag);
        idx.mark(&TrendKey::new("old", None), t0()).unwrap();
        idx.mark(&TrendKey::new("new", None), t0() + Duration::hours(12)).unwrap();

        assert_eq!(idx.purge_expired(t0() + Duration::hours(25)).unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
