pub mod activity;
pub mod entities;
pub mod history;
pub mod records;

pub use activity::{ExpiringSetStore, MemoryExpiringSet, RecentActivityIndex};
pub use entities::{EntityDirectory, MemoryEntityDirectory};
pub use history::{DayUsage, HistoryKey, HistoryStore, MemoryHistoryStore, UsageHistory};
pub use records::{MemoryRecordStore, Peak, TrendRecord, TrendRecordStore};
