//! Feed view state: fetched records, view-local edits and the refresh cycle.
//!
//! The view owns what it fetched plus what the operator did locally
//! (dismissed items, draft answers, the active filter). Background refreshes
//! replace fetched records only, so local edits survive them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::backend::Backend;
use crate::counter::RunningGuard;
use crate::error::{FeedError, SurfacedError};
use crate::feed::format::group_by_day;
use crate::feed::{build_feed, visible_items, ActivityFilter, FeedSources};
use crate::refresh::{RefreshBroadcaster, Subscription};
use crate::types::{ActivityRecord, FeedItem, LeadOverview, RecentActivity};

/// Whether a fetch was asked for by the operator or by the background signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Shows the loading flag and surfaces failures.
    Loud,
    /// No loading flag; failures are logged and swallowed.
    Silent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Applied,
    Failed(SurfacedError),
    AlreadyRunning,
    /// The view was unmounted while fetching.
    Discarded,
}

#[derive(Default)]
struct ViewState {
    activity: RecentActivity,
    overview: LeadOverview,
    loaded: bool,
    loading: bool,
    error: Option<SurfacedError>,
    dismissed: HashSet<String>,
    drafts: HashMap<String, String>,
    responding: HashSet<String>,
    filter: ActivityFilter,
}

pub struct FeedView {
    backend: Arc<dyn Backend>,
    activity_limit: u32,
    state: Mutex<ViewState>,
    refreshing: AtomicBool,
    alive: AtomicBool,
    /// Bumped on every unmount; work started under an older value is dropped.
    generation: AtomicU64,
    /// Counts refreshes that changed fetched records.
    applied_tx: watch::Sender<u64>,
    subscription: Mutex<Option<Subscription>>,
}

impl FeedView {
    pub fn new(backend: Arc<dyn Backend>, activity_limit: u32) -> Self {
        let (applied_tx, _) = watch::channel(0);
        Self {
            backend,
            activity_limit,
            state: Mutex::new(ViewState::default()),
            refreshing: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            applied_tx,
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to the refresh signal. Each signal spawns a silent refresh
    /// on the current runtime.
    pub fn mount(self: &Arc<Self>, broadcaster: &RefreshBroadcaster) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::warn!("Feed view: no runtime to run background refreshes on: {}", e);
                return;
            }
        };
        self.alive.store(true, Ordering::SeqCst);

        let view = Arc::downgrade(self);
        let subscription = broadcaster.subscribe(move || {
            let Some(view) = view.upgrade() else {
                return;
            };
            runtime.spawn(async move {
                view.refresh(FetchMode::Silent).await;
            });
        });
        *self.subscription.lock() = Some(subscription);
    }

    /// Release the signal subscription. Fetches still in flight are dropped
    /// when they complete.
    pub fn unmount(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.lock().is_some()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mounted, and not unmounted since `generation` was read.
    fn is_current(&self, generation: u64) -> bool {
        self.alive.load(Ordering::SeqCst) && self.generation() == generation
    }

    /// Observe refreshes that landed new records. The value is a revision
    /// number; only its changes matter.
    pub fn subscribe_applied(&self) -> watch::Receiver<u64> {
        self.applied_tx.subscribe()
    }

    /// Fetch recent activity and the lead overview concurrently.
    ///
    /// A source that fails keeps its previously fetched records.
    pub async fn refresh(&self, mode: FetchMode) -> RefreshOutcome {
        let Some(_refreshing) = RunningGuard::try_acquire(&self.refreshing) else {
            log::debug!("Feed view: refresh already running");
            return RefreshOutcome::AlreadyRunning;
        };
        let generation = self.generation();
        if mode == FetchMode::Loud {
            self.state.lock().loading = true;
        }

        let (activity, overview) = tokio::join!(
            self.backend.recent_activity(self.activity_limit),
            self.backend.lead_overview()
        );

        let mut state = self.state.lock();
        if mode == FetchMode::Loud {
            state.loading = false;
        }
        if !self.is_current(generation) {
            log::debug!("Feed view: unmounted during refresh, discarding results");
            return RefreshOutcome::Discarded;
        }

        let mut failure: Option<FeedError> = None;
        let mut changed = false;
        match activity {
            Ok(activity) => {
                state.activity = activity;
                changed = true;
            }
            Err(e) => failure = Some(e),
        }
        match overview {
            Ok(overview) => {
                state.overview = overview;
                changed = true;
            }
            Err(e) => {
                failure.get_or_insert(e);
            }
        }
        if changed {
            self.applied_tx.send_modify(|revision| *revision += 1);
        }

        let Some(err) = failure else {
            state.loaded = true;
            state.error = None;
            return RefreshOutcome::Applied;
        };

        let surfaced = SurfacedError::from(&err);
        match mode {
            FetchMode::Loud => {
                log::warn!("Feed view: refresh failed: {}", err);
                state.error = Some(surfaced.clone());
            }
            FetchMode::Silent => log::debug!("Feed view: background refresh failed: {}", err),
        }
        RefreshOutcome::Failed(surfaced)
    }

    /// The visible feed: built from fetched records, minus dismissed items,
    /// narrowed by the active filter.
    pub fn items(&self, now: DateTime<Utc>) -> Vec<FeedItem> {
        let state = self.state.lock();
        let mut activities: Vec<ActivityRecord> = state.activity.activities.clone();
        activities.extend(state.overview.activities.iter().cloned());

        let sources = FeedSources {
            leads: &state.overview.leads.recent,
            activities: &activities,
            needing_attention: &state.overview.leads.needing_attention,
        };
        visible_items(
            build_feed(&sources, now),
            &state.dismissed,
            state.filter,
            state.activity.current_user_id.as_deref(),
        )
    }

    pub fn grouped_items(&self, now: DateTime<Utc>) -> Vec<(String, Vec<FeedItem>)> {
        group_by_day(&self.items(now), now)
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn error(&self) -> Option<SurfacedError> {
        self.state.lock().error.clone()
    }

    pub fn clear_error(&self) {
        self.state.lock().error = None;
    }

    /// Hide an item from this view. Source records are untouched.
    pub fn dismiss(&self, item_id: &str) {
        self.state.lock().dismissed.insert(item_id.to_string());
    }

    pub fn restore_dismissed(&self) {
        self.state.lock().dismissed.clear();
    }

    pub fn filter(&self) -> ActivityFilter {
        self.state.lock().filter
    }

    pub fn set_filter(&self, filter: ActivityFilter) {
        self.state.lock().filter = filter;
    }

    pub fn set_draft(&self, action_id: &str, draft: &str) {
        self.state
            .lock()
            .drafts
            .insert(action_id.to_string(), draft.to_string());
    }

    pub fn draft(&self, action_id: &str) -> Option<String> {
        self.state.lock().drafts.get(action_id).cloned()
    }

    pub fn is_responding(&self, action_id: &str) -> bool {
        self.state.lock().responding.contains(action_id)
    }

    /// Answer a pending action.
    ///
    /// On failure the error is surfaced and the item stays in the feed. On
    /// success the draft is dropped and the feed re-fetches silently; the item
    /// changes only once that refetch lands.
    pub async fn respond(
        &self,
        action_id: &str,
        response: &str,
    ) -> Result<ActivityRecord, SurfacedError> {
        if !self
            .state
            .lock()
            .responding
            .insert(action_id.to_string())
        {
            return Err(SurfacedError::from(&FeedError::InvalidRequest(
                "an answer for this action is already being sent".to_string(),
            )));
        }
        let generation = self.generation();

        let result = self
            .backend
            .respond_to_pending_action(action_id, response)
            .await;
        self.state.lock().responding.remove(action_id);

        match result {
            Ok(record) => {
                {
                    let mut state = self.state.lock();
                    state.drafts.remove(action_id);
                    state.error = None;
                }
                self.refresh(FetchMode::Silent).await;
                Ok(record)
            }
            Err(e) => {
                log::warn!("Feed view: answering action {} failed: {}", action_id, e);
                let surfaced = SurfacedError::from(&e);
                if self.is_current(generation) {
                    self.state.lock().error = Some(surfaced.clone());
                }
                Err(surfaced)
            }
        }
    }

    /// Answer with the stored draft.
    pub async fn submit_draft(&self, action_id: &str) -> Result<ActivityRecord, SurfacedError> {
        let draft = self.draft(action_id).unwrap_or_default();
        self.respond(action_id, &draft).await
    }

    /// Withdraw a pending action without answering it.
    pub async fn cancel(&self, action_id: &str, reason: Option<&str>) -> Result<(), SurfacedError> {
        let generation = self.generation();
        match self.backend.cancel_pending_action(action_id, reason).await {
            Ok(()) => {
                self.state.lock().drafts.remove(action_id);
                self.refresh(FetchMode::Silent).await;
                Ok(())
            }
            Err(e) => {
                log::warn!("Feed view: cancelling action {} failed: {}", action_id, e);
                let surfaced = SurfacedError::from(&e);
                if self.is_current(generation) {
                    self.state.lock().error = Some(surfaced.clone());
                }
                Err(surfaced)
            }
        }
    }
}

impl Drop for FeedView {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::error::ErrorType;
    use crate::types::{FeedItemKind, LeadBuckets, LeadSummary};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn lead(id: &str, created_at: &str) -> LeadSummary {
        LeadSummary {
            id: id.to_string(),
            first_name: Some("Ana".to_string()),
            email: "ana@example.com".to_string(),
            status: Some("NEW".to_string()),
            created_at: created_at.to_string(),
            ..Default::default()
        }
    }

    fn agent_query(id: &str, created_by: Option<&str>) -> ActivityRecord {
        serde_json::from_value(json!({
            "id": id,
            "leadId": "lead-9",
            "type": "JARVIS_QUERY",
            "description": "Which listing?",
            "createdAt": "2026-10-19T10:00:00Z",
            "createdBy": created_by,
            "jarvisAction": {
                "id": format!("pa-{}", id),
                "question": "Assign to which listing?",
                "options": [{ "id": "p1", "label": "Loft" }],
                "status": "PENDING"
            }
        }))
        .unwrap()
    }

    fn feed_backend() -> FakeBackend {
        FakeBackend::with_feed(
            RecentActivity {
                activities: vec![agent_query("a1", Some("u2"))],
                current_user_id: Some("u1".to_string()),
            },
            LeadOverview {
                leads: LeadBuckets {
                    recent: vec![lead("lead-1", "2026-10-19T11:00:00Z")],
                    needing_attention: Vec::new(),
                },
                activities: vec![agent_query("a1", Some("u2"))],
            },
        )
    }

    fn view(backend: FakeBackend) -> (Arc<FakeBackend>, Arc<FeedView>) {
        let backend = Arc::new(backend);
        let view = Arc::new(FeedView::new(backend.clone(), 100));
        (backend, view)
    }

    #[tokio::test]
    async fn loud_refresh_loads_and_builds_feed() {
        let (_, view) = view(feed_backend());
        assert_eq!(view.refresh(FetchMode::Loud).await, RefreshOutcome::Applied);
        assert!(view.is_loaded());
        assert!(!view.is_loading());

        let items = view.items(now());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, FeedItemKind::NewLead);
        assert_eq!(items[0].priority, 1);
        assert_eq!(items[1].id, "activity-a1");
    }

    #[tokio::test]
    async fn loud_failure_is_surfaced_and_keeps_data() {
        let (backend, view) = view(feed_backend());
        view.refresh(FetchMode::Loud).await;

        *backend.activity.lock() = None;
        let outcome = view.refresh(FetchMode::Loud).await;
        assert!(matches!(outcome, RefreshOutcome::Failed(_)));

        let error = view.error().expect("surfaced error");
        assert_eq!(error.error_type, ErrorType::Retryable);
        assert!(error.can_retry);
        assert!(!view.is_loading());
        assert_eq!(view.items(now()).len(), 2);
    }

    #[tokio::test]
    async fn silent_failure_is_swallowed() {
        let (_, view) = view(FakeBackend::new());
        let outcome = view.refresh(FetchMode::Silent).await;
        assert!(matches!(outcome, RefreshOutcome::Failed(_)));
        assert!(view.error().is_none());
        assert!(view.items(now()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_loud_refresh_shows_loading() {
        let backend = feed_backend();
        *backend.delay.lock() = Some(Duration::from_secs(2));
        let (_, view) = view(backend);

        let (_, loading_while_loud) = tokio::join!(view.refresh(FetchMode::Loud), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            view.is_loading()
        });
        assert!(loading_while_loud);

        let (_, loading_while_silent) = tokio::join!(view.refresh(FetchMode::Silent), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            view.is_loading()
        });
        assert!(!loading_while_silent);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refreshes_are_prevented() {
        let backend = feed_backend();
        *backend.delay.lock() = Some(Duration::from_secs(2));
        let (backend, view) = view(backend);

        let (first, second) = tokio::join!(
            view.refresh(FetchMode::Silent),
            view.refresh(FetchMode::Loud)
        );
        assert_eq!(first, RefreshOutcome::Applied);
        assert_eq!(second, RefreshOutcome::AlreadyRunning);
        assert_eq!(FakeBackend::calls(&backend.activity_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmounted_view_discards_results() {
        let backend = feed_backend();
        *backend.delay.lock() = Some(Duration::from_secs(2));
        let (_, view) = view(backend);

        let (outcome, _) = tokio::join!(view.refresh(FetchMode::Loud), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            view.unmount();
        });
        assert_eq!(outcome, RefreshOutcome::Discarded);
        assert!(!view.is_loaded());
        assert!(!view.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn remounting_does_not_revive_an_earlier_fetch() {
        let backend = feed_backend();
        *backend.delay.lock() = Some(Duration::from_secs(2));
        let (_, view) = view(backend);
        let broadcaster = RefreshBroadcaster::new();
        view.mount(&broadcaster);

        let (outcome, _) = tokio::join!(view.refresh(FetchMode::Loud), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            view.unmount();
            view.mount(&broadcaster);
        });
        assert_eq!(outcome, RefreshOutcome::Discarded);
        assert!(!view.is_loaded());
        assert!(!view.is_loading());

        assert_eq!(view.refresh(FetchMode::Loud).await, RefreshOutcome::Applied);
        assert!(view.is_loaded());
    }

    #[tokio::test]
    async fn applied_refreshes_bump_the_revision() {
        let (backend, view) = view(feed_backend());
        let mut applied = view.subscribe_applied();
        assert!(!applied.has_changed().unwrap());

        view.refresh(FetchMode::Silent).await;
        assert!(applied.has_changed().unwrap());
        assert_eq!(*applied.borrow_and_update(), 1);

        *backend.activity.lock() = None;
        *backend.overview.lock() = None;
        view.refresh(FetchMode::Silent).await;
        assert!(!applied.has_changed().unwrap());

        *backend.overview.lock() = Some(LeadOverview::default());
        view.refresh(FetchMode::Silent).await;
        assert_eq!(*applied.borrow_and_update(), 2);
    }

    #[tokio::test]
    async fn dismissal_hides_without_touching_sources() {
        let (_, view) = view(feed_backend());
        view.refresh(FetchMode::Loud).await;

        view.dismiss("lead-lead-1");
        let items = view.items(now());
        assert_eq!(items.len(), 1);
        assert!(items.iter().all(|item| item.id != "lead-lead-1"));

        view.refresh(FetchMode::Silent).await;
        assert_eq!(view.items(now()).len(), 1);

        view.restore_dismissed();
        assert_eq!(view.items(now()).len(), 2);
    }

    #[tokio::test]
    async fn filters_narrow_the_feed() {
        let (_, view) = view(feed_backend());
        view.refresh(FetchMode::Loud).await;

        view.set_filter(ActivityFilter::Pending);
        let pending = view.items(now());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "activity-a1");

        view.set_filter(ActivityFilter::Mine);
        let mine = view.items(now());
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].kind, FeedItemKind::NewLead);
    }

    #[tokio::test]
    async fn failed_answer_is_surfaced_and_item_stays() {
        let (_, view) = view(feed_backend());
        view.refresh(FetchMode::Loud).await;
        view.set_draft("pa-a1", "Loft");

        let err = view.submit_draft("pa-a1").await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::Retryable);
        assert_eq!(view.error(), Some(err));
        assert_eq!(view.draft("pa-a1").as_deref(), Some("Loft"));
        assert!(!view.is_responding("pa-a1"));
        assert!(view.items(now()).iter().any(|item| item.id == "activity-a1"));
    }

    #[tokio::test]
    async fn successful_answer_clears_draft_and_refetches() {
        let backend = feed_backend();
        *backend.respond_result.lock() = Some(agent_query("a1", None));
        let (backend, view) = view(backend);
        view.refresh(FetchMode::Loud).await;
        view.set_draft("pa-a1", "Loft");

        let record = view.submit_draft("pa-a1").await.unwrap();
        assert_eq!(record.id, "a1");
        assert!(view.draft("pa-a1").is_none());
        assert_eq!(FakeBackend::calls(&backend.activity_calls), 2);
        assert_eq!(
            backend.responses.lock().as_slice(),
            &[("pa-a1".to_string(), "Loft".to_string())]
        );
    }

    #[tokio::test]
    async fn blank_answer_is_rejected() {
        let (backend, view) = view(feed_backend());
        let err = view.respond("pa-a1", "   ").await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::NonRetryable);
        assert!(backend.responses.lock().is_empty());
    }

    #[tokio::test]
    async fn drafts_survive_background_refresh() {
        let (_, view) = view(feed_backend());
        view.set_draft("pa-a1", "Loft, second floor");
        view.refresh(FetchMode::Silent).await;
        assert_eq!(view.draft("pa-a1").as_deref(), Some("Loft, second floor"));
    }

    #[tokio::test]
    async fn cancel_clears_draft_and_refetches() {
        let (backend, view) = view(feed_backend());
        view.set_draft("pa-a1", "Loft");
        view.cancel("pa-a1", Some("not relevant")).await.unwrap();
        assert!(view.draft("pa-a1").is_none());
        assert_eq!(backend.cancelled.lock().as_slice(), &["pa-a1".to_string()]);
        assert_eq!(FakeBackend::calls(&backend.activity_calls), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mounted_view_refreshes_on_signal_until_unmounted() {
        let (backend, view) = view(feed_backend());
        let broadcaster = RefreshBroadcaster::new();
        view.mount(&broadcaster);
        assert!(view.is_mounted());

        broadcaster.publish();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(FakeBackend::calls(&backend.activity_calls), 1);
        assert!(view.is_loaded());

        view.unmount();
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.publish();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(FakeBackend::calls(&backend.activity_calls), 1);
    }

    #[tokio::test]
    async fn dropping_view_releases_subscription() {
        let (_, view) = view(feed_backend());
        let broadcaster = RefreshBroadcaster::new();
        view.mount(&broadcaster);
        drop(view);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
