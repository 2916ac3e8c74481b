// trendwatch/src/state/entities.rs
//
// Entity directory: resolves an entity's current trendable flag and display
// attributes, and records when moderators were asked to review it.

use std::path::Path;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::warn;

use crate::error::Result;
use crate::events::{EntityKind, TrendableEntity};

pub trait EntityDirectory: Send + Sync {
    fn resolve(&self, kind: EntityKind, id: &str) -> Result<Option<TrendableEntity>>;
    /// Stamp `requested_review_at` once. Returns false when the entity is
    /// unknown or was already stamped.
    fn mark_review_requested(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<bool>;
}

#[derive(Default)]
pub struct MemoryEntityDirectory {
    entities: DashMap<(EntityKind, String), TrendableEntity>,
}

impl MemoryEntityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: TrendableEntity) {
        self.entities.insert((entity.kind, entity.id.clone()), entity);
    }

    /// Register an entity seen for the first time as pending review.
    /// Returns true if it was not known before.
    pub fn ensure(&self, kind: EntityKind, id: &str) -> bool {
        let mut inserted = false;
        self.entities.entry((kind, id.to_string())).or_insert_with(|| {
            inserted = true;
            TrendableEntity::pending(kind, id)
        });
        inserted
    }

    pub fn set_trendable(&self, kind: EntityKind, id: &str, trendable: bool) -> bool {
        match self.entities.get_mut(&(kind, id.to_string())) {
            Some(mut e) => {
                e.trendable = trendable;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Preload entities from JSONL, one TrendableEntity per line. Malformed
    /// lines are skipped with a warning.
    pub fn load_jsonl(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let mut loaded = 0;
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() { continue; }
            match serde_json::from_str::<TrendableEntity>(line) {
                Ok(entity) => {
                    self.insert(entity);
                    loaded += 1;
                }
                Err(e) => warn!("{}:{}: skipping entity: {}", path.display(), n + 1, e),
            }
        }
        Ok(loaded)
    }
}

impl EntityDirectory for MemoryEntityDirectory {
    fn resolve(&self, kind: EntityKind, id: &str) -> Result<Option<TrendableEntity>> {
        Ok(self.entities.get(&(kind, id.to_string())).map(|e| e.clone()))
    }

    fn mark_review_requested(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<bool> {
        Ok(match self.entities.get_mut(&(kind, id.to_string())) {
            Some(mut e) if e.requested_review_at.is_none() => {
                e.requested_review_at = Some(at);
                true
            }
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn ensure_only_inserts_once() {
        let dir = MemoryEntityDirectory::new();
        assert!(dir.ensure(EntityKind::Tag, "rust"));
        dir.set_trendable(EntityKind::Tag, "rust", true);
        assert!(!dir.ensure(EntityKind::Tag, "rust"));
        assert!(dir.resolve(EntityKind::Tag, "rust").unwrap().unwrap().trendable);
    }

    #[test]
    fn review_stamp_is_set_once() {
        let dir = MemoryEntityDirectory::new();
        dir.ensure(EntityKind::Tag, "rust");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert!(dir.mark_review_requested(EntityKind::Tag, "rust", at).unwrap());
        assert!(!dir.mark_review_requested(EntityKind::Tag, "rust", at).unwrap());
        assert!(!dir.mark_review_requested(EntityKind::Tag, "missing", at).unwrap());
        assert_eq!(
            dir.resolve(EntityKind::Tag, "rust").unwrap().unwrap().requested_review_at,
            Some(at)
        );
    }

    #[test]
    fn same_id_under_different_kinds_is_distinct() {
        let dir = MemoryEntityDirectory::new();
        dir.ensure(EntityKind::Tag, "x");
        assert!(dir.resolve(EntityKind::Link, "x").unwrap().is_none());
    }

    #[test]
    fn jsonl_preload_skips_bad_lines() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("entities.jsonl");
        fs::write(
            &path,
            "{\"id\":\"rust\",\"kind\":\"tag\",\"trendable\":true}\nnot json\n\n{\"id\":\"go\",\"kind\":\"tag\"}\n",
        ).expect("write entities");

        let dir = MemoryEntityDirectory::new();
        assert_eq!(dir.load_jsonl(&path).unwrap(), 2);
        let rust = dir.resolve(EntityKind::Tag, "rust").unwrap().unwrap();
        assert!(rust.trendable);
        assert!(rust.usable);
        assert!(!dir.resolve(EntityKind::Tag, "go").unwrap().unwrap().trendable);
    }
}
