// trendwatch/src/kinds/mod.rs
//
// Trend kinds. Each kind plugs into the generic engine with:
//   - a source filter (the common one unless the kind counts reblogs)
//   - an extra eligibility rule on top of it
//   - entity extraction from a usage event
//   - display attributes copied onto trend records

pub mod links;
pub mod statuses;
pub mod tags;

use std::collections::HashMap;

use crate::events::{EntityId, EntityKind, TrendableEntity, UsageEvent};

pub trait TrendKind: Send + Sync + 'static {
    fn kind(&self) -> EntityKind;

    fn source_eligible(&self, event: &UsageEvent) -> bool {
        is_eligible_source(event)
    }

    /// Kind-specific eligibility, checked after `source_eligible`.
    fn eligible(&self, _event: &UsageEvent) -> bool {
        true
    }

    /// Normalized, deduplicated entity ids referenced by the event.
    fn extract(&self, event: &UsageEvent) -> Vec<EntityId>;

    /// Whether new usage of a known entity is counted at all.
    fn usable(&self, entity: &TrendableEntity) -> bool {
        entity.usable
    }

    fn attributes(&self, entity: &TrendableEntity) -> HashMap<String, serde_json::Value>;
}

/// Common source filter: reblogs, non-public posts and silenced authors
/// never contribute to any trend.
pub fn is_eligible_source(event: &UsageEvent) -> bool {
    !event.reblog && event.visibility.is_public() && !event.author_silenced
}

/// Keep first occurrence, drop repeats.
pub(crate) fn dedup(ids: impl IntoIterator<Item = EntityId>) -> Vec<EntityId> {
    let mut out: Vec<EntityId> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
