// trendwatch/src/engine/refresh.rs
//
// Scheduled recomputation.
//
// Two candidate passes, each in fixed-size batches:
//   (a) every key currently holding a TrendRecord (cursor over the table)
//   (b) every key in the recent-activity index
// A key in both passes is scored twice; the second pass sees the peak the
// first one wrote and produces the same score, so the upsert is a no-op.
// Ranks are recomputed once, after every batch has been written.
//
// A failed batch aborts the refresh. Entities in that batch keep their old
// state and are picked up again on the next run.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use super::scoring::Verdict;
use super::{TrendEngine, Trends};
use crate::config::TrendOptions;
use crate::error::Result;
use crate::events::{EntityId, TrendKey};
use crate::kinds::TrendKind;
use crate::state::records::TrendRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    pub scored:  usize,
    pub kept:    usize,
    pub expired: usize,
    pub ranked:  usize,
}

impl<K: TrendKind> Trends<K> {
    pub fn refresh(&self, at: DateTime<Utc>) -> Result<RefreshStats> {
        self.refresh_with(at, &self.options)
    }

    /// Refresh with one-off tunables instead of the engine's own.
    pub fn refresh_with(&self, at: DateTime<Utc>, opts: &TrendOptions) -> Result<RefreshStats> {
        opts.validate()?;
        let _guard = self.refresh_lock.lock();
        let kind   = self.entity_kind();
        let mut stats = RefreshStats::default();

        let active    = self.activity.active(at)?;
        let languages = languages_by_entity(&active);
        info!(%kind, active = active.len(), "refresh started");

        // (a) previously trending
        let mut cursor: Option<TrendKey> = None;
        loop {
            let batch = self.records.keys_after(cursor.as_ref(), opts.batch_size)?;
            if batch.is_empty() { break; }
            cursor = batch.last().cloned();
            self.refresh_batch(&batch, &languages, at, opts, &mut stats)?;
            if batch.len() < opts.batch_size { break; }
        }
        debug!(%kind, scored = stats.scored, "previously trending pass done");

        // (b) recently active
        for batch in active.chunks(opts.batch_size) {
            self.refresh_batch(batch, &languages, at, opts, &mut stats)?;
        }

        stats.ranked = self.records.recompute_ranks()?;
        info!(
            %kind,
            scored  = stats.scored,
            kept    = stats.kept,
            expired = stats.expired,
            ranked  = stats.ranked,
            "refresh finished"
        );
        Ok(stats)
    }

    fn refresh_batch(
        &self,
        keys:      &[TrendKey],
        languages: &HashMap<EntityId, BTreeSet<String>>,
        at:        DateTime<Utc>,
        opts:      &TrendOptions,
        stats:     &mut RefreshStats,
    ) -> Result<()> {
        let scored = self.scorer.score_batch(keys, at, opts)?;
        stats.scored += scored.len();

        let mut to_upsert = Vec::new();
        let mut to_delete = Vec::new();
        for s in scored {
            match s.verdict {
                Verdict::Expire => to_delete.push(s.key),
                Verdict::Keep   => {
                    let entity = self.entities.resolve(self.entity_kind(), &s.key.entity)?;
                    let mut langs = languages.get(&s.key.entity).cloned().unwrap_or_default();
                    langs.insert(s.key.language.clone());
                    to_upsert.push(TrendRecord {
                        score:        s.score,
                        max_score:    s.peak.map(|p| p.score).unwrap_or(0.0),
                        max_score_at: s.peak.map(|p| p.at),
                        allowed:      entity.as_ref().map(|e| e.trendable).unwrap_or(false),
                        languages:    langs,
                        rank:         None,
                        attributes:   entity.as_ref().map(|e| self.kind.attributes(e)).unwrap_or_default(),
                        key:          s.key,
                    });
                }
            }
        }

        stats.kept += to_upsert.len();
        if !to_upsert.is_empty() {
            if let Err(e) = self.records.upsert_all(to_upsert) {
                error!(kind = %self.entity_kind(), "bulk upsert failed: {}", e);
                return Err(e);
            }
        }
        if !to_delete.is_empty() {
            stats.expired += self.records.delete_all(&to_delete)?;
        }
        Ok(())
    }
}

/// Refresh every engine on a fixed interval until the task is dropped.
pub async fn refresh_loop(engines: Vec<Arc<dyn TrendEngine>>, every: std::time::Duration) {
    loop {
        tokio::time::sleep(every).await;
        let now = Utc::now();
        for engine in &engines {
            if let Err(e) = engine.refresh(now) {
                error!(kind = %engine.entity_kind(), "refresh failed: {}", e);
            }
        }
    }
}

/// Languages each entity was active in, from the activity index.
fn languages_by_entity(active: &[TrendKey]) -> HashMap<EntityId, BTreeSet<String>> {
    let mut map: HashMap<EntityId, BTreeSet<String>> = HashMap::new();
    for key in active {
        map.entry(key.entity.clone()).or_default().insert(key.language.clone());
    }
    map
}
