// trendwatch/src/lib.rs
//
// Trend scoring engine.
//
// Pipeline:
//   UsageEvent → register (eligibility) → add (history + activity index)
//   scheduled refresh → scoring → TrendRecord store → ranks
//   query / request_review read the TrendRecord store
//
// One generic engine (`Trends<K>`) is instantiated per trend kind (tags,
// links, statuses); the kind supplies eligibility, entity extraction and
// display attributes.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod kinds;
pub mod state;

pub use config::{DaemonConfig, TrendOptions};
pub use engine::query::{Query, TrendEntry};
pub use engine::refresh::RefreshStats;
pub use engine::review::ReviewDispatcher;
pub use engine::{Collaborators, TrendEngine, Trends};
pub use error::{Result, TrendsError};
pub use events::{EntityId, EntityKind, ReviewItem, TrendKey, TrendableEntity, UsageEvent, Viewer, Visibility};
pub use kinds::{links::Links, statuses::Statuses, tags::Tags, TrendKind};
