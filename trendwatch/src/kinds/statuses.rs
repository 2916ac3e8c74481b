// trendwatch/src/kinds/statuses.rs
//
// Status trends. The entity is the original status: a fresh post counts its
// author once, each reblog counts the reblogging account against the boosted
// status. Reblogs therefore pass this kind's source filter, the visibility
// and silenced checks still apply.

use std::collections::HashMap;

use serde_json::json;

use super::TrendKind;
use crate::events::{EntityId, EntityKind, TrendableEntity, UsageEvent};

#[derive(Debug, Clone, Copy, Default)]
pub struct Statuses;

impl TrendKind for Statuses {
    fn kind(&self) -> EntityKind {
        EntityKind::Status
    }

    fn source_eligible(&self, event: &UsageEvent) -> bool {
        event.visibility.is_public() && !event.author_silenced
    }

    fn eligible(&self, event: &UsageEvent) -> bool {
        !event.sensitive
    }

    fn extract(&self, event: &UsageEvent) -> Vec<EntityId> {
        let original = if event.reblog { event.reblog_of.as_deref() } else { Some(event.status_id.as_str()) };
        original
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| vec![id.to_string()])
            .unwrap_or_default()
    }

    fn attributes(&self, entity: &TrendableEntity) -> HashMap<String, serde_json::Value> {
        let mut attrs = entity.attributes.clone();
        attrs.insert("status_id".into(), json!(entity.id));
        attrs
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::events::Visibility;

    fn post(status_id: &str) -> UsageEvent {
        UsageEvent {
            status_id:       status_id.into(),
            account_id:      "alice".into(),
            timestamp:       Utc::now(),
            language:        Some("en".into()),
            visibility:      Visibility::Public,
            reblog:          false,
            reblog_of:       None,
            author_silenced: false,
            sensitive:       false,
            tags:            vec![],
            links:           vec![],
        }
    }

    fn reblog(status_id: &str, of: Option<&str>) -> UsageEvent {
        UsageEvent { reblog: true, reblog_of: of.map(String::from), ..post(status_id) }
    }

    #[test]
    fn original_post_counts_itself() {
        assert_eq!(Statuses.extract(&post("100")), vec!["100".to_string()]);
    }

    #[test]
    fn reblog_counts_the_boosted_status() {
        let ev = reblog("200", Some("100"));
        assert!(Statuses.source_eligible(&ev));
        assert_eq!(Statuses.extract(&ev), vec!["100".to_string()]);
    }

    #[test]
    fn reblog_without_original_extracts_nothing() {
        assert!(Statuses.extract(&reblog("200", None)).is_empty());
    }

    #[test]
    fn private_silenced_and_sensitive_are_rejected() {
        assert!(!Statuses.source_eligible(&UsageEvent { visibility: Visibility::Private, ..post("1") }));
        assert!(!Statuses.source_eligible(&UsageEvent { author_silenced: true, ..post("1") }));
        assert!(!Statuses.eligible(&UsageEvent { sensitive: true, ..post("1") }));
    }

    #[test]
    fn attributes_carry_status_id() {
        let entity = TrendableEntity::pending(EntityKind::Status, "100");
        assert_eq!(Statuses.attributes(&entity).get("status_id"), Some(&json!("100")));
    }
}
