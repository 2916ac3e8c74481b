// trendwatch/src/engine/mod.rs
//
// Generic trend engine, one instance per trend kind.
//
// Ingestion (`register` → `add`) runs on the publish path and may be called
// concurrently. `refresh` is a scheduled batch job; overlapping refreshes of
// the same engine are serialized by `refresh_lock`, callers running several
// processes must still hold an external lock per kind.

pub mod query;
pub mod refresh;
pub mod review;
pub mod scoring;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::TrendOptions;
use crate::error::Result;
use crate::events::{normalize_language, EntityId, EntityKind, ReviewItem, TrendKey, UsageEvent};
use crate::kinds::TrendKind;
use crate::state::activity::{ExpiringSetStore, MemoryExpiringSet, RecentActivityIndex};
use crate::state::entities::EntityDirectory;
use crate::state::history::{DayUsage, HistoryKey, HistoryStore, MemoryHistoryStore, UsageHistory};
use crate::state::records::{MemoryRecordStore, TrendRecord, TrendRecordStore};

use self::query::{Query, TrendEntry};
use self::refresh::RefreshStats;
use self::scoring::ScoringEngine;

/// Storage collaborators for one engine. History and activity stores may be
/// shared between kinds (keys are namespaced by kind); the record store is
/// scoped to a single kind.
#[derive(Clone)]
pub struct Collaborators {
    pub history:  Arc<dyn HistoryStore>,
    pub activity: Arc<dyn ExpiringSetStore>,
    pub records:  Arc<dyn TrendRecordStore>,
    pub entities: Arc<dyn EntityDirectory>,
}

impl Collaborators {
    /// Fresh in-memory stores around the given directory.
    pub fn in_memory(entities: Arc<dyn EntityDirectory>) -> Self {
        Self {
            history:  Arc::new(MemoryHistoryStore::new()),
            activity: Arc::new(MemoryExpiringSet::new()),
            records:  Arc::new(MemoryRecordStore::new()),
            entities,
        }
    }

    /// Same history/activity/entity stores, new record table. Used to run a
    /// second kind beside an existing one.
    pub fn with_fresh_records(&self) -> Self {
        Self { records: Arc::new(MemoryRecordStore::new()), ..self.clone() }
    }
}

pub struct Trends<K: TrendKind> {
    kind:         K,
    options:      TrendOptions,
    history:      UsageHistory,
    activity:     RecentActivityIndex,
    records:      Arc<dyn TrendRecordStore>,
    entities:     Arc<dyn EntityDirectory>,
    scorer:       ScoringEngine,
    refresh_lock: Mutex<()>,

    pub total_registered: AtomicU64,
    pub total_rejected:   AtomicU64,
}

impl<K: TrendKind> Trends<K> {
    pub fn new(kind: K, options: TrendOptions, stores: Collaborators) -> Result<Self> {
        options.validate()?;
        let entity_kind = kind.kind();
        let history  = UsageHistory::new(stores.history);
        let activity = RecentActivityIndex::new(stores.activity, entity_kind, options.activity_ttl());
        let scorer   = ScoringEngine::new(entity_kind, history.clone(), stores.records.clone());
        Ok(Self {
            kind,
            options,
            history,
            activity,
            records: stores.records,
            entities: stores.entities,
            scorer,
            refresh_lock: Mutex::new(()),
            total_registered: AtomicU64::new(0),
            total_rejected:   AtomicU64::new(0),
        })
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.kind.kind()
    }

    pub fn options(&self) -> &TrendOptions {
        &self.options
    }

    // ── Ingestion ─────────────────────────────────────────────────────────────

    /// Count every qualifying entity in `event`. Ineligible events are
    /// dropped silently; the return value is how many entities were added.
    pub fn register(&self, event: &UsageEvent, at: DateTime<Utc>) -> Result<usize> {
        if !self.kind.source_eligible(event) || !self.kind.eligible(event) {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(0);
        }

        let mut added = 0;
        for id in self.kind.extract(event) {
            if let Some(entity) = self.entities.resolve(self.entity_kind(), &id)? {
                if !self.kind.usable(&entity) { continue; }
            }
            self.add(&id, &event.account_id, event.language.as_deref(), at)?;
            added += 1;
        }
        if added > 0 {
            self.total_registered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(added)
    }

    /// Record one use of `entity` by `actor`. Writes the display history, the
    /// language-scoped scoring history and the recent-activity index, whether
    /// or not the entity currently trends.
    pub fn add(&self, entity: &str, actor: &str, language: Option<&str>, at: DateTime<Utc>) -> Result<()> {
        let kind     = self.entity_kind();
        let language = normalize_language(language);
        self.history.add(&HistoryKey::display(kind, entity), actor, at)?;
        self.history.add(&HistoryKey::scoring(kind, entity, &language), actor, at)?;
        self.activity.mark(&TrendKey { entity: entity.to_string(), language }, at)?;
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Display history for `entity`, newest day first.
    pub fn history(&self, entity: &str, at: DateTime<Utc>, days: usize) -> Result<Vec<DayUsage>> {
        self.history.days(&HistoryKey::display(self.entity_kind(), entity), at, days)
    }

    pub fn record(&self, entity: &str, language: Option<&str>) -> Result<Option<TrendRecord>> {
        self.records.get(&TrendKey::new(entity, language))
    }

    pub fn query(&self) -> Query {
        Query::new(self.records.clone())
    }

    pub fn currently_trending(&self, limit: usize) -> Result<Vec<TrendEntry>> {
        self.query().allowed().limit(limit).execute()
    }

    /// Languages that currently have at least one allowed record.
    pub fn available_languages(&self) -> Result<BTreeSet<String>> {
        Ok(self.records
            .snapshot()?
            .into_iter()
            .filter(|r| r.allowed)
            .map(|r| r.key.language)
            .collect())
    }

    // ── Housekeeping ──────────────────────────────────────────────────────────

    pub fn evict_history_before(&self, day: NaiveDate) -> Result<usize> {
        let evicted = self.history.evict_before(day)?;
        debug!(kind = %self.entity_kind(), evicted, "history buckets evicted");
        Ok(evicted)
    }

    pub fn purge_activity(&self, at: DateTime<Utc>) -> Result<usize> {
        self.activity.purge_expired(at)
    }

    /// Peaks past their cooldown already read as absent; drop them.
    pub fn purge_expired_peaks(&self, at: DateTime<Utc>) -> Result<usize> {
        let purged = self.records.purge_peaks(at - self.options.max_score_cooldown())?;
        debug!(kind = %self.entity_kind(), purged, "expired peaks purged");
        Ok(purged)
    }
}

// ── Object-safe view ──────────────────────────────────────────────────────────

/// Kind-erased engine so the daemon can drive every enabled kind from one
/// list.
pub trait TrendEngine: Send + Sync {
    fn entity_kind(&self) -> EntityKind;
    fn extract(&self, event: &UsageEvent) -> Vec<EntityId>;
    fn register(&self, event: &UsageEvent, at: DateTime<Utc>) -> Result<usize>;
    fn refresh(&self, at: DateTime<Utc>) -> Result<RefreshStats>;
    fn request_review(&self, at: DateTime<Utc>) -> Result<Vec<ReviewItem>>;
    fn currently_trending(&self, limit: usize) -> Result<Vec<TrendEntry>>;
    fn housekeep(&self, at: DateTime<Utc>, retention_days: i64) -> Result<usize>;
    fn registered(&self) -> u64;
}

impl<K: TrendKind> TrendEngine for Trends<K> {
    fn entity_kind(&self) -> EntityKind {
        Trends::entity_kind(self)
    }

    fn extract(&self, event: &UsageEvent) -> Vec<EntityId> {
        self.kind.extract(event)
    }

    fn register(&self, event: &UsageEvent, at: DateTime<Utc>) -> Result<usize> {
        Trends::register(self, event, at)
    }

    fn refresh(&self, at: DateTime<Utc>) -> Result<RefreshStats> {
        Trends::refresh(self, at)
    }

    fn request_review(&self, at: DateTime<Utc>) -> Result<Vec<ReviewItem>> {
        Trends::request_review(self, at)
    }

    fn currently_trending(&self, limit: usize) -> Result<Vec<TrendEntry>> {
        Trends::currently_trending(self, limit)
    }

    fn housekeep(&self, at: DateTime<Utc>, retention_days: i64) -> Result<usize> {
        let cutoff = (at - chrono::Duration::days(retention_days - 1)).date_naive();
        let evicted = self.evict_history_before(cutoff)?;
        self.purge_activity(at)?;
        self.purge_expired_peaks(at)?;
        Ok(evicted)
    }

    fn registered(&self) -> u64 {
        self.total_registered.load(Ordering::Relaxed)
    }
}

/// Evict history past the retention window and purge expired activity.
pub async fn housekeeping_loop(
    engines:        Vec<Arc<dyn TrendEngine>>,
    every:          std::time::Duration,
    retention_days: i64,
) {
    loop {
        tokio::time::sleep(every).await;
        let now = Utc::now();
        for engine in &engines {
            if let Err(e) = engine.housekeep(now, retention_days) {
                warn!(kind = %engine.entity_kind(), "housekeeping failed: {}", e);
            }
        }
    }
}
