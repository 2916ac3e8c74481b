// trendwatch/src/state/history.rs
//
// Day-bucketed usage history.
//
// Each bucket belongs to one (kind, entity[, language], day) and counts:
//   uses      every add() landing in the bucket
//   accounts  distinct actors (the only value the scorer reads)
//
// The display history is keyed without a language and is never scored; the
// scoring history is keyed per language. Both share one HistoryStore.
// Buckets are append-only: nothing rewrites a past day, eviction only drops
// whole buckets older than the retention window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::error::Result;
use crate::events::{EntityId, EntityKind};

pub fn day_of(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

// ── Keys ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub kind:     EntityKind,
    pub entity:   EntityId,
    pub language: Option<String>, // None = display history
}

impl HistoryKey {
    pub fn display(kind: EntityKind, entity: &str) -> Self {
        Self { kind, entity: entity.to_string(), language: None }
    }

    pub fn scoring(kind: EntityKind, entity: &str, language: &str) -> Self {
        Self { kind, entity: entity.to_string(), language: Some(language.to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub history: HistoryKey,
    pub day:     NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayUsage {
    pub day:      NaiveDate,
    pub uses:     u64,
    pub accounts: u64,
}

// ── Storage collaborator ──────────────────────────────────────────────────────

/// Unique-count storage behind the history. Implementations must make
/// `add_unique` atomic per bucket; the engine never compare-and-swaps.
pub trait HistoryStore: Send + Sync {
    fn add_unique(&self, bucket: &BucketKey, actor: &str) -> Result<()>;
    fn incr_uses(&self, bucket: &BucketKey) -> Result<()>;
    fn unique_count(&self, bucket: &BucketKey) -> Result<u64>;
    fn uses(&self, bucket: &BucketKey) -> Result<u64>;
    /// Drop every bucket strictly older than `day`; returns how many went.
    fn evict_before(&self, day: NaiveDate) -> Result<usize>;
}

#[derive(Debug, Default)]
struct Bucket {
    uses:   u64,
    actors: HashSet<String>,
}

/// DashMap-backed store. The entry guard holds the shard lock, so two
/// concurrent adds to one bucket cannot lose an actor.
#[derive(Default)]
pub struct MemoryHistoryStore {
    buckets: DashMap<BucketKey, Bucket>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn add_unique(&self, bucket: &BucketKey, actor: &str) -> Result<()> {
        self.buckets.entry(bucket.clone()).or_default().actors.insert(actor.to_string());
        Ok(())
    }

    fn incr_uses(&self, bucket: &BucketKey) -> Result<()> {
        self.buckets.entry(bucket.clone()).or_default().uses += 1;
        Ok(())
    }

    fn unique_count(&self, bucket: &BucketKey) -> Result<u64> {
        Ok(self.buckets.get(bucket).map(|b| b.actors.len() as u64).unwrap_or(0))
    }

    fn uses(&self, bucket: &BucketKey) -> Result<u64> {
        Ok(self.buckets.get(bucket).map(|b| b.uses).unwrap_or(0))
    }

    fn evict_before(&self, day: NaiveDate) -> Result<usize> {
        let before = self.buckets.len();
        self.buckets.retain(|k, _| k.day >= day);
        Ok(before - self.buckets.len())
    }
}

// ── History view ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct UsageHistory {
    store: Arc<dyn HistoryStore>,
}

impl UsageHistory {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Record one use by `actor` in the bucket for `at`'s day. Repeating the
    /// same actor within a day bumps `uses` but not `accounts`.
    pub fn add(&self, key: &HistoryKey, actor: &str, at: DateTime<Utc>) -> Result<()> {
        let bucket = BucketKey { history: key.clone(), day: day_of(at) };
        self.store.incr_uses(&bucket)?;
        self.store.add_unique(&bucket, actor)
    }

    pub fn get(&self, key: &HistoryKey, at: DateTime<Utc>) -> Result<DayUsage> {
        let bucket = BucketKey { history: key.clone(), day: day_of(at) };
        Ok(DayUsage {
            day:      bucket.day,
            uses:     self.store.uses(&bucket)?,
            accounts: self.store.unique_count(&bucket)?,
        })
    }

    /// Distinct actors for the day containing `at`. Absent data is zero.
    pub fn accounts(&self, key: &HistoryKey, at: DateTime<Utc>) -> Result<u64> {
        self.store.unique_count(&BucketKey { history: key.clone(), day: day_of(at) })
    }

    /// The last `n` days ending at `at`, newest first.
    pub fn days(&self, key: &HistoryKey, at: DateTime<Utc>, n: usize) -> Result<Vec<DayUsage>> {
        (0..n as i64)
            .map(|offset| self.get(key, at - Duration::days(offset)))
            .collect()
    }

    pub fn evict_before(&self, day: NaiveDate) -> Result<usize> {
        self.store.evict_before(day)
    }
}
