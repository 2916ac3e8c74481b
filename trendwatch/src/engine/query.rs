// trendwatch/src/engine/query.rs
//
// Read-only, composable listing over one kind's trend records.
//
// Every setter returns a new Query; the receiver is left untouched, so a
// base query can be shared and specialised per request.
//
// Ordering:
//   1. records in the viewer's preferred languages (when a viewer is set)
//   2. score descending
//   3. key, for a stable order between equal scores
// An entity scored in several languages is listed once, at its first
// position.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::events::{normalize_language, EntityId, Viewer};
use crate::state::records::{TrendRecord, TrendRecordStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendEntry {
    pub entity:     EntityId,
    pub language:   String,
    pub score:      f64,
    pub rank:       Option<u32>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl From<TrendRecord> for TrendEntry {
    fn from(r: TrendRecord) -> Self {
        Self {
            entity:     r.key.entity,
            language:   r.key.language,
            score:      r.score,
            rank:       r.rank,
            attributes: r.attributes,
        }
    }
}

#[derive(Clone)]
pub struct Query {
    records:   Arc<dyn TrendRecordStore>,
    allowed:   bool,
    preferred: Option<BTreeSet<String>>,
    language:  Option<String>,
    offset:    Option<usize>,
    limit:     Option<usize>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("allowed", &self.allowed)
            .field("preferred", &self.preferred)
            .field("language", &self.language)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

impl Query {
    pub(crate) fn new(records: Arc<dyn TrendRecordStore>) -> Self {
        Self { records, allowed: false, preferred: None, language: None, offset: None, limit: None }
    }

    /// Only records approved for public display.
    pub fn allowed(&self) -> Self {
        Self { allowed: true, ..self.clone() }
    }

    /// Float the viewer's preferred languages to the top.
    pub fn filtered_for(&self, viewer: &Viewer) -> Self {
        let preferred = if viewer.preferred_languages.is_empty() {
            None
        } else {
            Some(viewer.preferred_languages.clone())
        };
        Self { preferred, ..self.clone() }
    }

    pub fn in_language(&self, language: &str) -> Self {
        Self { language: Some(normalize_language(Some(language))), ..self.clone() }
    }

    pub fn offset(&self, n: usize) -> Self {
        Self { offset: Some(n), ..self.clone() }
    }

    pub fn limit(&self, n: usize) -> Self {
        Self { limit: Some(n), ..self.clone() }
    }

    pub fn execute(&self) -> Result<Vec<TrendEntry>> {
        let mut rows: Vec<TrendRecord> = self.records
            .snapshot()?
            .into_iter()
            .filter(|r| !self.allowed || r.allowed)
            .filter(|r| self.language.as_ref().map(|l| &r.key.language == l).unwrap_or(true))
            .collect();

        rows.sort_by(|a, b| {
            self.tier(b).cmp(&self.tier(a))
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.key.cmp(&b.key))
        });

        let mut seen = HashSet::new();
        Ok(rows
            .into_iter()
            .filter(|r| seen.insert(r.key.entity.clone()))
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .map(TrendEntry::from)
            .collect())
    }

    fn tier(&self, record: &TrendRecord) -> bool {
        self.preferred
            .as_ref()
            .map(|p| p.contains(&record.key.language))
            .unwrap_or(false)
    }
}
