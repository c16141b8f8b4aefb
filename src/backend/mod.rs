//! Backend operations consumed by the feed and the counter.

use async_trait::async_trait;

use crate::error::FeedError;
use crate::types::{
    ActivityRecord, LeadOverview, MailboxUnreadCounts, NotificationCounts, RecentActivity,
};

pub mod http;

#[cfg(test)]
pub mod fake;

pub use http::HttpBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Recent activity records, newest first, at most `limit`.
    async fn recent_activity(&self, limit: u32) -> Result<RecentActivity, FeedError>;

    /// Lead buckets (recent, needing attention) plus overview activities.
    async fn lead_overview(&self) -> Result<LeadOverview, FeedError>;

    /// Contacts, careers, open issues and per-channel message totals.
    async fn notification_counts(&self) -> Result<NotificationCounts, FeedError>;

    async fn mailbox_unread_counts(&self) -> Result<MailboxUnreadCounts, FeedError>;

    /// Answer a pending action. Returns the activity that records the answer.
    async fn respond_to_pending_action(
        &self,
        action_id: &str,
        response: &str,
    ) -> Result<ActivityRecord, FeedError>;

    async fn cancel_pending_action(
        &self,
        action_id: &str,
        reason: Option<&str>,
    ) -> Result<(), FeedError>;
}

/// Reject blank answers before they reach the network.
pub(crate) fn validate_response(response: &str) -> Result<&str, FeedError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(FeedError::InvalidRequest(
            "response must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_responses_are_rejected() {
        assert!(matches!(
            validate_response("   "),
            Err(FeedError::InvalidRequest(_))
        ));
        assert_eq!(validate_response(" Loft ").unwrap(), "Loft");
    }
}
