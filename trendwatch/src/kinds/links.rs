// trendwatch/src/kinds/links.rs
//
// Link trends. Entity id = normalized http(s) URL. Sensitive posts are not
// counted: a link preview is shown without the content warning.

use std::collections::HashMap;

use serde_json::json;

use super::{dedup, TrendKind};
use crate::events::{EntityId, EntityKind, TrendableEntity, UsageEvent};

#[derive(Debug, Clone, Copy, Default)]
pub struct Links;

/// Lowercase scheme and host, drop the fragment and any trailing slash.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (scheme, rest) = raw.split_once("://")?;
    let scheme = scheme.to_lowercase();
    if scheme != "http" && scheme != "https" { return None; }

    let rest = rest.split('#').next().unwrap_or_default();
    let (host, path) = match rest.find(|c| c == '/' || c == '?') {
        Some(i) => rest.split_at(i),
        None    => (rest, ""),
    };
    if host.is_empty() { return None; }

    let path = path.trim_end_matches('/');
    Some(format!("{}://{}{}", scheme, host.to_lowercase(), path))
}

impl TrendKind for Links {
    fn kind(&self) -> EntityKind {
        EntityKind::Link
    }

    fn eligible(&self, event: &UsageEvent) -> bool {
        !event.sensitive
    }

    fn extract(&self, event: &UsageEvent) -> Vec<EntityId> {
        dedup(event.links.iter().filter_map(|l| normalize_url(l)))
    }

    fn attributes(&self, entity: &TrendableEntity) -> HashMap<String, serde_json::Value> {
        let mut attrs = entity.attributes.clone();
        attrs.insert("url".into(), json!(entity.id));
        if !entity.name.is_empty() && entity.name != entity.id {
            attrs.insert("title".into(), json!(entity.name));
        }
        attrs
    }
}
