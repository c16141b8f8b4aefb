//! View-side narrowing of a built feed: "mine"/"pending" filters and dismissal.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::FeedItem;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityFilter {
    #[default]
    All,
    /// Items created by the current user, plus legacy items with no creator.
    Mine,
    /// Items carrying a pending action still awaiting a choice.
    Pending,
}

impl ActivityFilter {
    pub fn matches(self, item: &FeedItem, current_user_id: Option<&str>) -> bool {
        match self {
            ActivityFilter::All => true,
            ActivityFilter::Mine => match (current_user_id, item.created_by.as_deref()) {
                (None, _) => true,
                (Some(_), None) => true,
                (Some(me), Some(creator)) => me == creator,
            },
            ActivityFilter::Pending => item
                .pending_action
                .as_ref()
                .map(|action| action.is_open())
                .unwrap_or(false),
        }
    }
}

/// Drop dismissed items and apply the filter. Source records are untouched.
pub fn visible_items(
    items: Vec<FeedItem>,
    dismissed: &HashSet<String>,
    filter: ActivityFilter,
    current_user_id: Option<&str>,
) -> Vec<FeedItem> {
    items
        .into_iter()
        .filter(|item| !dismissed.contains(&item.id))
        .filter(|item| filter.matches(item, current_user_id))
        .collect()
}
