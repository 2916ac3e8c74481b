// trendwatch/src/kinds/tags.rs
//
// Hashtag trends. Entity id = normalized tag name: '#' stripped, lowercased,
// letters/digits/underscore only, not purely numeric.

use std::collections::HashMap;

use serde_json::json;

use super::{dedup, TrendKind};
use crate::events::{EntityId, EntityKind, TrendableEntity, UsageEvent};

#[derive(Debug, Clone, Copy, Default)]
pub struct Tags;

pub fn normalize_tag(raw: &str) -> Option<String> {
    let name = raw.trim().trim_start_matches('#');
    if name.is_empty() { return None; }
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') { return None; }
    if name.chars().all(|c| c.is_ascii_digit()) { return None; }
    Some(name.to_lowercase())
}

impl TrendKind for Tags {
    fn kind(&self) -> EntityKind {
        EntityKind::Tag
    }

    fn extract(&self, event: &UsageEvent) -> Vec<EntityId> {
        dedup(event.tags.iter().filter_map(|t| normalize_tag(t)))
    }

    fn attributes(&self, entity: &TrendableEntity) -> HashMap<String, serde_json::Value> {
        let name = if entity.name.is_empty() { &entity.id } else { &entity.name };
        let mut attrs = entity.attributes.clone();
        attrs.insert("name".into(), json!(name));
        attrs
    }
}
