// trendwatch/src/state/records.rs
//
// Persisted trend state for one trend kind.
//
// A TrendRecord exists iff its decayed score cleared decay_threshold at the
// last refresh. Only refresh writes here; queries read snapshots.
//
// Peaks (max_score / max_score_at) are kept beside the records because they
// must survive a record being deleted: a trend that decays out and bursts
// again within the cooldown still measures against its old peak.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::TrendKey;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub score: f64,
    pub at:    DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub key:          TrendKey,
    pub score:        f64,
    pub max_score:    f64,
    pub max_score_at: Option<DateTime<Utc>>,
    pub allowed:      bool,
    pub languages:    BTreeSet<String>,
    pub rank:         Option<u32>, // None unless allowed
    pub attributes:   HashMap<String, serde_json::Value>,
}

// ── Storage collaborator ──────────────────────────────────────────────────────

pub trait TrendRecordStore: Send + Sync {
    fn get(&self, key: &TrendKey) -> Result<Option<TrendRecord>>;
    /// Cursor iteration in key order: up to `limit` keys strictly after `cursor`.
    fn keys_after(&self, cursor: Option<&TrendKey>, limit: usize) -> Result<Vec<TrendKey>>;
    /// Insert or overwrite by key. An existing rank is carried over until the
    /// next `recompute_ranks`.
    fn upsert_all(&self, records: Vec<TrendRecord>) -> Result<()>;
    fn delete_all(&self, keys: &[TrendKey]) -> Result<usize>;
    /// Dense rank by score over allowed records; returns how many were ranked.
    fn recompute_ranks(&self) -> Result<usize>;
    fn snapshot(&self) -> Result<Vec<TrendRecord>>;
    fn peak(&self, key: &TrendKey) -> Result<Option<Peak>>;
    fn save_peak(&self, key: &TrendKey, peak: Peak) -> Result<()>;
    /// Drop peaks set at or before `cutoff`; returns how many went.
    fn purge_peaks(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<TrendKey, TrendRecord>>,
    peaks:   DashMap<TrendKey, Peak>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Assign dense ranks in place. Allowed records are ordered by score
/// descending (key breaks ties so reruns are stable); equal scores share a
/// rank and the next distinct score takes the next integer.
pub fn assign_dense_ranks<'a, I>(records: I) -> usize
where
    I: IntoIterator<Item = &'a mut TrendRecord>,
{
    let mut allowed: Vec<&mut TrendRecord> = Vec::new();
    for record in records {
        if record.allowed {
            allowed.push(record);
        } else {
            record.rank = None;
        }
    }
    allowed.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));

    let mut rank = 0u32;
    let mut last: Option<f64> = None;
    for record in allowed.iter_mut() {
        if last.map(|s| record.score < s).unwrap_or(true) {
            rank += 1;
            last = Some(record.score);
        }
        record.rank = Some(rank);
    }
    allowed.len()
}

impl TrendRecordStore for MemoryRecordStore {
    fn get(&self, key: &TrendKey) -> Result<Option<TrendRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn keys_after(&self, cursor: Option<&TrendKey>, limit: usize) -> Result<Vec<TrendKey>> {
        let records = self.records.read();
        let lower = match cursor {
            Some(c) => Bound::Excluded(c.clone()),
            None    => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn upsert_all(&self, records: Vec<TrendRecord>) -> Result<()> {
        let mut table = self.records.write();
        for mut record in records {
            if let Some(existing) = table.get(&record.key) {
                if record.allowed {
                    record.rank = existing.rank;
                }
            }
            if !record.allowed {
                record.rank = None;
            }
            table.insert(record.key.clone(), record);
        }
        Ok(())
    }

    fn delete_all(&self, keys: &[TrendKey]) -> Result<usize> {
        let mut table = self.records.write();
        Ok(keys.iter().filter(|k| table.remove(*k).is_some()).count())
    }

    fn recompute_ranks(&self) -> Result<usize> {
        let mut table = self.records.write();
        Ok(assign_dense_ranks(table.values_mut()))
    }

    fn snapshot(&self) -> Result<Vec<TrendRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn peak(&self, key: &TrendKey) -> Result<Option<Peak>> {
        Ok(self.peaks.get(key).map(|p| *p))
    }

    fn save_peak(&self, key: &TrendKey, peak: Peak) -> Result<()> {
        self.peaks.insert(key.clone(), peak);
        Ok(())
    }

    fn purge_peaks(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.peaks.len();
        self.peaks.retain(|_, p| p.at > cutoff);
        Ok(before - self.peaks.len())
    }
}
