// trendwatch/src/engine/review.rs
//
// Review promotion for pending (not yet allowed) trends.
//
// scoreAtThreshold = score of the review_threshold-th allowed record in
// rank order, 0 when fewer exist. A pending record is surfaced when
//   - its score is strictly above scoreAtThreshold
//   - its entity is still not trendable
//   - its entity has not been flagged before
// Flagging stamps requested_review_at once, so repeated calls never notify
// twice for the same entity.
//
// ReviewDispatcher appends each batch to JSONL files in the output
// directory. Wire these to the moderation queue in production.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use super::Trends;
use crate::config::TrendOptions;
use crate::error::Result;
use crate::events::ReviewItem;
use crate::kinds::TrendKind;
use crate::state::records::TrendRecord;

/// Score the `threshold`-th allowed record holds, in rank order.
pub fn score_at_threshold(records: &[TrendRecord], threshold: usize) -> f64 {
    let mut allowed: Vec<&TrendRecord> = records.iter().filter(|r| r.allowed).collect();
    allowed.sort_by(|a, b| {
        a.rank.unwrap_or(u32::MAX).cmp(&b.rank.unwrap_or(u32::MAX))
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.key.cmp(&b.key))
    });
    match threshold.checked_sub(1).and_then(|i| allowed.get(i)) {
        Some(r) => r.score,
        None    => 0.0,
    }
}

impl<K: TrendKind> Trends<K> {
    pub fn request_review(&self, at: DateTime<Utc>) -> Result<Vec<ReviewItem>> {
        self.request_review_with(at, &self.options)
    }

    pub fn request_review_with(&self, at: DateTime<Utc>, opts: &TrendOptions) -> Result<Vec<ReviewItem>> {
        let kind      = self.entity_kind();
        let records   = self.records.snapshot()?;
        let threshold = score_at_threshold(&records, opts.review_threshold);

        let mut pending: Vec<&TrendRecord> = records.iter()
            .filter(|r| !r.allowed && r.score > threshold)
            .collect();
        pending.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));

        let mut batch = Vec::new();
        for record in pending {
            let entity = match self.entities.resolve(kind, &record.key.entity)? {
                Some(e) => e,
                None    => continue,
            };
            if entity.trendable || entity.requested_review_at.is_some() { continue; }
            if !self.entities.mark_review_requested(kind, &entity.id, at)? { continue; }

            batch.push(ReviewItem {
                kind,
                entity:       entity.id.clone(),
                name:         if entity.name.is_empty() { entity.id.clone() } else { entity.name.clone() },
                language:     record.key.language.clone(),
                score:        record.score,
                requested_at: at,
            });
        }

        if !batch.is_empty() {
            info!(%kind, threshold, flagged = batch.len(), "trends pending review");
        }
        Ok(batch)
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

pub struct ReviewDispatcher {
    out: PathBuf,
}

impl ReviewDispatcher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)?;
        Ok(Self { out })
    }

    pub fn output_dir(&self) -> &Path {
        &self.out
    }

    /// Append the batch to review_queue.jsonl and audit_log.jsonl.
    pub async fn dispatch(&self, items: &[ReviewItem]) -> Result<usize> {
        if items.is_empty() { return Ok(0); }
        let lines: String = items.iter().map(|i| i.to_jsonl() + "\n").collect();
        self.write("review_queue.jsonl", &lines).await?;
        self.write("audit_log.jsonl", &lines).await?;
        info!("REVIEW_REQUESTED n={} out={}", items.len(), self.out.display());
        Ok(items.len())
    }

    async fn write(&self, file: &str, content: &str) -> Result<()> {
        let mut f = OpenOptions::new().create(true).append(true)
            .open(self.out.join(file)).await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}

/// Periodically ask every engine for review candidates and dispatch them.
pub async fn review_loop(
    engines:    Vec<Arc<dyn super::TrendEngine>>,
    dispatcher: Arc<ReviewDispatcher>,
    every:      std::time::Duration,
) {
    loop {
        tokio::time::sleep(every).await;
        let now = Utc::now();
        for engine in &engines {
            match engine.request_review(now) {
                Ok(items) => {
                    if let Err(e) = dispatcher.dispatch(&items).await {
                        error!(kind = %engine.entity_kind(), "review dispatch failed: {}", e);
                    }
                }
                Err(e) => error!(kind = %engine.entity_kind(), "review request failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::engine::Collaborators;
    use crate::events::{EntityKind, TrendKey};
    use crate::kinds::tags::Tags;
    use crate::state::entities::{EntityDirectory, MemoryEntityDirectory};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn record(entity: &str, score: f64, allowed: bool) -> TrendRecord {
        TrendRecord {
            key:          TrendKey::new(entity, Some("en")),
            score,
            max_score:    score,
            max_score_at: Some(t0()),
            allowed,
            languages:    BTreeSet::new(),
            rank:         None,
            attributes:   HashMap::new(),
        }
    }

    fn engine(records: Vec<TrendRecord>) -> (Trends<Tags>, Arc<MemoryEntityDirectory>) {
        let dir = Arc::new(MemoryEntityDirectory::new());
        for r in &records {
            dir.ensure(EntityKind::Tag, &r.key.entity);
            dir.set_trendable(EntityKind::Tag, &r.key.entity, r.allowed);
        }
        let trends = Trends::new(Tags, TrendOptions::default(), Collaborators::in_memory(dir.clone()))
            .expect("engine");
        trends.records.upsert_all(records).unwrap();
        trends.records.recompute_ranks().unwrap();
        (trends, dir)
    }

    fn opts(review_threshold: usize) -> TrendOptions {
        TrendOptions { review_threshold, ..TrendOptions::default() }
    }

    #[test]
    fn threshold_score_is_positional() {
        let records = vec![record("a", 10.0, true), record("b", 7.0, true), record("c", 4.0, true)];
        let (trends, _) = engine(records);
        let snapshot = trends.records.snapshot().unwrap();
        assert_eq!(score_at_threshold(&snapshot, 2), 7.0);
        assert_eq!(score_at_threshold(&snapshot, 3), 4.0);
        assert_eq!(score_at_threshold(&snapshot, 4), 0.0);
    }

    #[test]
    fn pending_above_threshold_is_flagged() {
        let (trends, dir) = engine(vec![
            record("a", 10.0, true),
            record("b", 7.0, true),
            record("c", 4.0, true),
            record("hot", 8.0, false),
            record("warm", 6.0, false),
        ]);

        let items = trends.request_review_with(t0(), &opts(2)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity, "hot");
        assert_eq!(items[0].score, 8.0);
        assert_eq!(
            dir.resolve(EntityKind::Tag, "hot").unwrap().unwrap().requested_review_at,
            Some(t0())
        );
        assert!(dir.resolve(EntityKind::Tag, "warm").unwrap().unwrap().requested_review_at.is_none());
    }

    #[test]
    fn flagging_is_idempotent() {
        let (trends, _) = engine(vec![record("a", 10.0, true), record("hot", 80.0, false)]);
        assert_eq!(trends.request_review(t0()).unwrap().len(), 1);
        assert!(trends.request_review(t0()).unwrap().is_empty());
    }

    #[test]
    fn few_allowed_records_means_zero_threshold() {
        let (trends, _) = engine(vec![record("pending", 1.5, false)]);
        let items = trends.request_review(t0()).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn entity_approved_since_refresh_is_skipped() {
        let (trends, dir) = engine(vec![record("hot", 80.0, false)]);
        dir.set_trendable(EntityKind::Tag, "hot", true);
        assert!(trends.request_review(t0()).unwrap().is_empty());
    }

    #[test]
    fn unknown_entity_is_skipped() {
        let (trends, _) = engine(vec![]);
        trends.records.upsert_all(vec![record("ghost", 80.0, false)]).unwrap();
        assert!(trends.request_review(t0()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatcher_appends_jsonl() {
        let temp = tempdir().expect("tempdir");
        let dispatcher = ReviewDispatcher::new(temp.path().join("out")).expect("dispatcher");
        let item = ReviewItem {
            kind:         EntityKind::Tag,
            entity:       "rust".into(),
            name:         "rust".into(),
            language:     "en".into(),
            score:        81.0,
            requested_at: t0(),
        };

        assert_eq!(dispatcher.dispatch(&[item.clone()]).await.unwrap(), 1);
        assert_eq!(dispatcher.dispatch(&[item.clone()]).await.unwrap(), 1);
        assert_eq!(dispatcher.dispatch(&[]).await.unwrap(), 0);

        let queue = std::fs::read_to_string(dispatcher.output_dir().join("review_queue.jsonl")).unwrap();
        let lines: Vec<&str> = queue.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: ReviewItem = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, item);
        assert!(dispatcher.output_dir().join("audit_log.jsonl").exists());
    }
}
