// trendwatch/src/engine/scoring.rs
//
// Decaying-anomaly scoring.
//
// Per candidate at time T:
//   expected = distinct actors yesterday (floored to 1.0)
//   observed = distinct actors today
//   anomaly  = 0                                   if expected > observed
//              0                                   if observed < threshold
//              (observed - expected)^2 / expected  otherwise
//   peak     = stored peak, reset to 0 once max_score_at <= T - cooldown;
//              replaced (and persisted immediately) when anomaly exceeds it
//   score    = peak * 0.5 ^ ((T - max_score_at) / halflife)
//   verdict  = Keep if score >= decay_threshold, else Expire

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::TrendOptions;
use crate::error::Result;
use crate::events::{EntityKind, TrendKey};
use crate::state::history::{HistoryKey, UsageHistory};
use crate::state::records::{Peak, TrendRecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Expire,
}

impl Verdict {
    /// Exactly `decay_threshold` is kept.
    pub fn classify(score: f64, decay_threshold: f64) -> Self {
        if score >= decay_threshold { Self::Keep } else { Self::Expire }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub key:      TrendKey,
    pub expected: f64,
    pub observed: f64,
    pub anomaly:  f64,
    pub peak:     Option<Peak>,
    pub score:    f64,
    pub verdict:  Verdict,
}

// ── Pure scoring functions ────────────────────────────────────────────────────

/// Growth-weighted anomaly. Never negative.
pub fn anomaly(expected: f64, observed: f64, threshold: f64) -> f64 {
    let expected = if expected <= 0.0 { 1.0 } else { expected };
    if expected > observed || observed < threshold {
        return 0.0;
    }
    (observed - expected).powi(2) / expected
}

/// The stored peak as seen at `at`: expired peaks read as absent.
pub fn live_peak(peak: Option<Peak>, at: DateTime<Utc>, cooldown: Duration) -> Option<Peak> {
    peak.filter(|p| p.at > at - cooldown)
}

/// Exponential decay from the peak. Equals `max_score` exactly at the peak.
pub fn decayed(max_score: f64, max_score_at: DateTime<Utc>, at: DateTime<Utc>, halflife: Duration) -> f64 {
    let elapsed  = (at - max_score_at).num_milliseconds() as f64 / 1000.0;
    let halflife = halflife.num_milliseconds() as f64 / 1000.0;
    max_score * 0.5f64.powf(elapsed / halflife)
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ScoringEngine {
    kind:    EntityKind,
    history: UsageHistory,
    records: Arc<dyn TrendRecordStore>,
}

impl ScoringEngine {
    pub fn new(kind: EntityKind, history: UsageHistory, records: Arc<dyn TrendRecordStore>) -> Self {
        Self { kind, history, records }
    }

    pub fn score_batch(&self, keys: &[TrendKey], at: DateTime<Utc>, opts: &TrendOptions) -> Result<Vec<Scored>> {
        keys.iter().map(|k| self.score(k, at, opts)).collect()
    }

    /// Score one candidate. A new peak is written through to the record
    /// store before returning, whatever the verdict.
    pub fn score(&self, key: &TrendKey, at: DateTime<Utc>, opts: &TrendOptions) -> Result<Scored> {
        let history  = HistoryKey::scoring(self.kind, &key.entity, &key.language);
        let expected = self.history.accounts(&history, at - Duration::days(1))? as f64;
        let expected = if expected == 0.0 { 1.0 } else { expected };
        let observed = self.history.accounts(&history, at)? as f64;
        let raw      = anomaly(expected, observed, opts.threshold);

        let mut peak = live_peak(self.records.peak(key)?, at, opts.max_score_cooldown());
        let max_score = peak.map(|p| p.score).unwrap_or(0.0);
        if raw > max_score {
            let fresh = Peak { score: raw, at };
            self.records.save_peak(key, fresh)?;
            debug!(kind = %self.kind, key = %key, anomaly = raw, "new peak");
            peak = Some(fresh);
        }

        let score = peak
            .map(|p| decayed(p.score, p.at, at, opts.max_score_halflife()))
            .unwrap_or(0.0);

        Ok(Scored {
            key: key.clone(),
            expected,
            observed,
            anomaly: raw,
            peak,
            score,
            verdict: Verdict::classify(score, opts.decay_threshold),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::state::history::MemoryHistoryStore;
    use crate::state::records::MemoryRecordStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn engine() -> (ScoringEngine, UsageHistory, Arc<MemoryRecordStore>) {
        let history = UsageHistory::new(Arc::new(MemoryHistoryStore::new()));
        let records = Arc::new(MemoryRecordStore::new());
        (ScoringEngine::new(EntityKind::Tag, history.clone(), records.clone()), history, records)
    }

    fn seed(history: &UsageHistory, key: &TrendKey, actors: usize, at: DateTime<Utc>) {
        let hk = HistoryKey::scoring(EntityKind::Tag, &key.entity, &key.language);
        for i in 0..actors {
            history.add(&hk, &format!("actor-{}", i), at).unwrap();
        }
    }

    #[test]
    fn anomaly_is_never_negative() {
        for expected in [0.0, 1.0, 3.0, 50.0] {
            for observed in [0.0, 1.0, 4.0, 5.0, 10.0, 100.0] {
                assert!(anomaly(expected, observed, 5.0) >= 0.0);
            }
        }
    }

    #[test]
    fn below_volume_threshold_scores_zero() {
        assert_eq!(anomaly(0.0, 4.0, 5.0), 0.0);
        assert_eq!(anomaly(1.0, 4.9, 5.0), 0.0);
    }

    #[test]
    fn shrinking_usage_scores_zero() {
        assert_eq!(anomaly(20.0, 10.0, 5.0), 0.0);
    }

    #[test]
    fn cold_start_burst_scores_81() {
        assert_eq!(anomaly(0.0, 10.0, 5.0), 81.0);
    }

    #[test]
    fn larger_baseline_discounts_same_jump() {
        assert!(anomaly(10.0, 20.0, 5.0) < anomaly(2.0, 12.0, 5.0));
    }

    #[test]
    fn decay_halves_after_one_halflife() {
        let m = 64.0;
        assert_eq!(decayed(m, t0(), t0(), Duration::hours(4)), m);
        let half = decayed(m, t0(), t0() + Duration::hours(4), Duration::hours(4));
        assert!((half - m / 2.0).abs() < 1e-9);
    }

    #[test]
    fn peak_expires_exactly_at_cooldown_edge() {
        let peak = Some(Peak { score: 50.0, at: t0() });
        let cooldown = Duration::days(2);

        assert_eq!(live_peak(peak, t0() + cooldown - Duration::seconds(1), cooldown), peak);
        assert_eq!(live_peak(peak, t0() + cooldown, cooldown), None);
        assert_eq!(live_peak(peak, t0() + cooldown + Duration::hours(1), cooldown), None);
    }

    #[test]
    fn exact_decay_threshold_is_kept() {
        assert_eq!(Verdict::classify(1.0, 1.0), Verdict::Keep);
        assert_eq!(Verdict::classify(0.999_999, 1.0), Verdict::Expire);
    }

    #[test]
    fn new_peak_is_persisted_even_when_expired() {
        let (engine, history, records) = engine();
        let key  = TrendKey::new("rust", Some("en"));
        seed(&history, &key, 6, t0());
        // 6 actors: anomaly 25, but a decay threshold above it expires the record
        let opts = TrendOptions { decay_threshold: 100.0, ..TrendOptions::default() };

        let scored = engine.score(&key, t0(), &opts).unwrap();
        assert_eq!(scored.anomaly, 25.0);
        assert_eq!(scored.verdict, Verdict::Expire);
        assert_eq!(records.peak(&key).unwrap(), Some(Peak { score: 25.0, at: t0() }));
    }

    #[test]
    fn weaker_anomaly_keeps_the_old_peak() {
        let (engine, history, records) = engine();
        let key  = TrendKey::new("rust", Some("en"));
        let opts = TrendOptions::default();
        records.save_peak(&key, Peak { score: 81.0, at: t0() - Duration::hours(4) }).unwrap();
        seed(&history, &key, 6, t0());

        let scored = engine.score(&key, t0(), &opts).unwrap();
        assert_eq!(scored.peak, Some(Peak { score: 81.0, at: t0() - Duration::hours(4) }));
        assert!((scored.score - 40.5).abs() < 1e-9);
        assert_eq!(scored.verdict, Verdict::Keep);
    }

    #[test]
    fn expired_peak_is_reestablished_by_smaller_burst() {
        let (engine, history, records) = engine();
        let key  = TrendKey::new("rust", Some("en"));
        let opts = TrendOptions::default();
        records.save_peak(&key, Peak { score: 500.0, at: t0() - Duration::days(3) }).unwrap();
        seed(&history, &key, 6, t0());

        let scored = engine.score(&key, t0(), &opts).unwrap();
        assert_eq!(scored.score, 25.0);
        assert_eq!(records.peak(&key).unwrap(), Some(Peak { score: 25.0, at: t0() }));
    }

    #[test]
    fn stored_peak_reads_as_zero_exactly_at_cooldown() {
        let (engine, _, records) = engine();
        let key  = TrendKey::new("rust", Some("en"));
        let opts = TrendOptions::default();
        records.save_peak(&key, Peak { score: 81.0, at: t0() }).unwrap();

        let at     = t0() + opts.max_score_cooldown();
        let scored = engine.score(&key, at, &opts).unwrap();
        assert_eq!(scored.peak, None);
        assert_eq!(scored.score, 0.0);
        assert_eq!(scored.verdict, Verdict::Expire);

        let before = engine.score(&key, at - Duration::seconds(1), &opts).unwrap();
        assert!(before.score > 0.0);
    }

    #[test]
    fn no_history_and_no_peak_scores_zero() {
        let (engine, _, records) = engine();
        let key    = TrendKey::new("quiet", None);
        let scored = engine.score(&key, t0(), &TrendOptions::default()).unwrap();
        assert_eq!(scored.expected, 1.0);
        assert_eq!(scored.score, 0.0);
        assert_eq!(scored.verdict, Verdict::Expire);
        assert_eq!(records.peak(&key).unwrap(), None);
    }
}
