// trendwatch/src/events.rs
//
// Shared domain types flowing through trendwatch.
//
// Usage events come from the publishing path (one JSON object per line in
// tail/replay modes). Downstream everything is keyed by TrendKey: the
// entity plus the language it was used in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub type EntityId = String;

/// Language bucket for events that carry no (or an empty) language tag.
pub const UNDETERMINED_LANGUAGE: &str = "und";

// ── Entity kinds ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tag,
    Link,
    Status,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tag => write!(f, "tags"),
            Self::Link => write!(f, "links"),
            Self::Status => write!(f, "statuses"),
        }
    }
}

// ── Usage events ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    /// Public and unlisted posts are both visible to anyone holding the link.
    pub fn is_public(self) -> bool {
        matches!(self, Self::Public | Self::Unlisted)
    }
}

/// One published status, as seen by the trend engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub status_id: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub reblog: bool,
    /// Id of the boosted status when `reblog` is set.
    #[serde(default)]
    pub reblog_of: Option<String>,
    #[serde(default)]
    pub author_silenced: bool,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

/// Lowercased language tag, `und` when missing or blank.
pub fn normalize_language(language: Option<&str>) -> String {
    match language.map(str::trim) {
        Some(l) if !l.is_empty() => l.to_lowercase(),
        _ => UNDETERMINED_LANGUAGE.to_string(),
    }
}

// ── Entities ──────────────────────────────────────────────────────────────────

fn default_usable() -> bool {
    true
}

/// Something that can trend. `trendable` is the moderation decision and is
/// independent of any score; `usable` gates whether new usage is counted at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendableEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub trendable: bool,
    #[serde(default = "default_usable")]
    pub usable: bool,
    #[serde(default)]
    pub requested_review_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl TrendableEntity {
    pub fn pending(kind: EntityKind, id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            name: id.to_string(),
            trendable: false,
            usable: true,
            requested_review_at: None,
            attributes: HashMap::new(),
        }
    }
}

/// Identity of a trend record: an entity scored within one language.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrendKey {
    pub entity: EntityId,
    pub language: String,
}

impl TrendKey {
    pub fn new(entity: impl Into<EntityId>, language: Option<&str>) -> Self {
        Self { entity: entity.into(), language: normalize_language(language) }
    }
}

impl std::fmt::Display for TrendKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity, self.language)
    }
}

// ── Viewers ───────────────────────────────────────────────────────────────────

/// The account a listing is rendered for. Only its language preferences
/// influence ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub preferred_languages: BTreeSet<String>,
}

impl Viewer {
    pub fn with_languages<I, S>(languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            preferred_languages: languages
                .into_iter()
                .map(|l| normalize_language(Some(l.as_ref())))
                .collect(),
        }
    }
}

// ── Review notifications ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub kind: EntityKind,
    pub entity: EntityId,
    pub name: String,
    pub language: String,
    pub score: f64,
    pub requested_at: DateTime<Utc>,
}

impl ReviewItem {
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_language_falls_back_to_undetermined() {
        assert_eq!(normalize_language(None), "und");
        assert_eq!(normalize_language(Some("  ")), "und");
        assert_eq!(normalize_language(Some("EN")), "en");
    }

    #[test]
    fn unlisted_counts_as_public() {
        assert!(Visibility::Public.is_public());
        assert!(Visibility::Unlisted.is_public());
        assert!(!Visibility::Private.is_public());
        assert!(!Visibility::Direct.is_public());
    }

    #[test]
    fn usage_event_defaults_optional_fields() {
        let raw = r#"{"status_id":"1","account_id":"a","timestamp":"2024-05-01T12:00:00Z","tags":["Rust"]}"#;
        let ev: UsageEvent = serde_json::from_str(raw).expect("parse event");
        assert_eq!(ev.visibility, Visibility::Public);
        assert!(!ev.reblog);
        assert!(ev.links.is_empty());
        assert_eq!(ev.tags, vec!["Rust".to_string()]);
    }
}
