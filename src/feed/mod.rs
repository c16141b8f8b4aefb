//! Activity feed: a pure merge of lead, activity and pending-action records
//! into one ranked list, plus the view-side filters and display helpers.

pub mod builder;
pub mod filter;
pub mod format;

pub use builder::{build_feed, sort_feed, FeedSources, LOOKBACK_DAYS, STALE_AFTER_DAYS};
pub use filter::{visible_items, ActivityFilter};
