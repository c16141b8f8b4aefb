//! Scripted in-process backend for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{validate_response, Backend};
use crate::error::FeedError;
use crate::types::{
    ActivityRecord, LeadOverview, MailboxUnreadCounts, NotificationCounts, RecentActivity,
};

/// Each source answers with its scripted value, or a network error when the
/// script holds `None`.
#[derive(Default)]
pub struct FakeBackend {
    pub activity: Mutex<Option<RecentActivity>>,
    pub overview: Mutex<Option<LeadOverview>>,
    pub counts: Mutex<Option<NotificationCounts>>,
    pub mailboxes: Mutex<Option<MailboxUnreadCounts>>,
    pub respond_result: Mutex<Option<ActivityRecord>>,
    pub delay: Mutex<Option<Duration>>,
    pub responses: Mutex<Vec<(String, String)>>,
    pub cancelled: Mutex<Vec<String>>,
    pub activity_calls: AtomicUsize,
    pub overview_calls: AtomicUsize,
    pub counts_calls: AtomicUsize,
    pub mailbox_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_counts(counts: NotificationCounts, mailboxes: MailboxUnreadCounts) -> Self {
        let backend = Self::default();
        *backend.counts.lock() = Some(counts);
        *backend.mailboxes.lock() = Some(mailboxes);
        backend
    }

    pub fn with_feed(activity: RecentActivity, overview: LeadOverview) -> Self {
        let backend = Self::default();
        *backend.activity.lock() = Some(activity);
        *backend.overview.lock() = Some(overview);
        backend
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn answer<T: Clone>(
        &self,
        counter: &AtomicUsize,
        script: &Mutex<Option<T>>,
        source: &str,
    ) -> Result<T, FeedError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = script.lock().clone();
        scripted.ok_or_else(|| FeedError::Network(format!("{} unavailable", source)))
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn recent_activity(&self, _limit: u32) -> Result<RecentActivity, FeedError> {
        self.answer(&self.activity_calls, &self.activity, "activities")
            .await
    }

    async fn lead_overview(&self) -> Result<LeadOverview, FeedError> {
        self.answer(&self.overview_calls, &self.overview, "overview")
            .await
    }

    async fn notification_counts(&self) -> Result<NotificationCounts, FeedError> {
        self.answer(&self.counts_calls, &self.counts, "counts").await
    }

    async fn mailbox_unread_counts(&self) -> Result<MailboxUnreadCounts, FeedError> {
        self.answer(&self.mailbox_calls, &self.mailboxes, "mailboxes")
            .await
    }

    async fn respond_to_pending_action(
        &self,
        action_id: &str,
        response: &str,
    ) -> Result<ActivityRecord, FeedError> {
        let response = validate_response(response)?;
        self.responses
            .lock()
            .push((action_id.to_string(), response.to_string()));
        self.respond_result
            .lock()
            .clone()
            .ok_or_else(|| FeedError::Http {
                status: 500,
                body: "respond failed".to_string(),
            })
    }

    async fn cancel_pending_action(
        &self,
        action_id: &str,
        _reason: Option<&str>,
    ) -> Result<(), FeedError> {
        self.cancelled.lock().push(action_id.to_string());
        Ok(())
    }
}
