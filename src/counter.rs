//! Navigation counters and the background poller that keeps them fresh.
//!
//! Each tick fetches the structured notification counts and the per-mailbox
//! unread counts concurrently, folds them together with the chat read state
//! into one `NotificationCounters`, and publishes the refresh signal so open
//! views re-fetch on the same cadence.
//!
//! - Ticks need a credential and are skipped on the sign-in view
//! - A failing source contributes zero; if every source fails the previous
//!   counters stay and nothing is published
//! - The signal is suppressed while the view is hidden
//! - Visiting a channel marks it read and recomputes chat immediately

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::Backend;
use crate::read_state::ReadStateStore;
use crate::refresh::RefreshBroadcaster;
use crate::state::Session;
use crate::types::{MailboxUnreadCounts, NotificationCounters, NotificationCounts};

/// Default tick period.
pub const POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Screen the operator is looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveView {
    SignIn,
    Feed,
    Channel(String),
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Updated { published: bool },
    AllSourcesFailed,
    AlreadyRunning,
    NoSession,
    SignInView,
    /// The session changed while fetching; results were dropped.
    Stale,
}

struct CounterState {
    counters: NotificationCounters,
    /// Last fetched message total per channel.
    channel_totals: HashMap<String, u64>,
    view: ActiveView,
}

pub struct NotificationCounter {
    backend: Arc<dyn Backend>,
    session: Arc<Session>,
    read_state: Arc<dyn ReadStateStore>,
    broadcaster: RefreshBroadcaster,
    mailboxes: Vec<String>,
    state: Mutex<CounterState>,
    counters_tx: watch::Sender<NotificationCounters>,
    running: AtomicBool,
    visible: AtomicBool,
    wake: Notify,
}

/// Holds an "already running" flag; clears it however the holder exits.
pub(crate) struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl NotificationCounter {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<Session>,
        read_state: Arc<dyn ReadStateStore>,
        broadcaster: RefreshBroadcaster,
        mailboxes: Vec<String>,
    ) -> Self {
        let (counters_tx, _) = watch::channel(NotificationCounters::default());
        Self {
            backend,
            session,
            read_state,
            broadcaster,
            mailboxes,
            state: Mutex::new(CounterState {
                counters: NotificationCounters::default(),
                channel_totals: HashMap::new(),
                view: ActiveView::Feed,
            }),
            counters_tx,
            running: AtomicBool::new(false),
            visible: AtomicBool::new(true),
            wake: Notify::new(),
        }
    }

    pub fn counters(&self) -> NotificationCounters {
        self.state.lock().counters
    }

    /// Observe every counters change, including navigation recomputes.
    pub fn subscribe_counters(&self) -> watch::Receiver<NotificationCounters> {
        self.counters_tx.subscribe()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn active_view(&self) -> ActiveView {
        self.state.lock().view.clone()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Foreground/background transition. Becoming visible triggers a tick
    /// right away instead of waiting for the next period.
    pub fn set_visible(&self, visible: bool) {
        let was_visible = self.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible {
            log::debug!("Counter: view visible again, waking poller");
            self.wake.notify_one();
        }
    }

    /// Record a navigation. Entering a channel marks its cached total as seen.
    pub fn navigate(&self, view: ActiveView) {
        let mut state = self.state.lock();
        let leaving_sign_in = state.view == ActiveView::SignIn && view != ActiveView::SignIn;

        if let ActiveView::Channel(channel_id) = &view {
            if let Some(&total) = state.channel_totals.get(channel_id) {
                self.read_state.set(channel_id, total);
            }
            let chat = count_unread_channels(&state.channel_totals, self.read_state.as_ref());
            state.counters.set_chat(chat);
            self.counters_tx.send_replace(state.counters);
        }
        state.view = view;
        drop(state);

        if leaving_sign_in {
            self.wake.notify_one();
        }
    }

    /// Zero every counter and forget cached channel totals.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.counters = NotificationCounters::default();
        state.channel_totals.clear();
        self.counters_tx.send_replace(state.counters);
    }

    /// Run one poll cycle.
    pub async fn tick(&self) -> TickOutcome {
        if !self.session.is_active() {
            return TickOutcome::NoSession;
        }
        if self.state.lock().view == ActiveView::SignIn {
            return TickOutcome::SignInView;
        }
        let Some(_running) = RunningGuard::try_acquire(&self.running) else {
            log::debug!("Counter: previous tick still running, skipping");
            return TickOutcome::AlreadyRunning;
        };
        let epoch = self.session.epoch();

        let (counts, mailboxes) = tokio::join!(
            self.backend.notification_counts(),
            self.backend.mailbox_unread_counts()
        );

        if self.session.epoch() != epoch || !self.session.is_active() {
            log::debug!("Counter: session changed during fetch, discarding results");
            return TickOutcome::Stale;
        }

        let counts = counts
            .map_err(|e| log::warn!("Counter: notification counts failed: {}", e))
            .ok();
        let mailboxes = mailboxes
            .map_err(|e| log::warn!("Counter: mailbox unread counts failed: {}", e))
            .ok();
        if counts.is_none() && mailboxes.is_none() {
            return TickOutcome::AllSourcesFailed;
        }

        {
            let mut state = self.state.lock();
            match &counts {
                Some(counts) => {
                    state.channel_totals = counts
                        .channels
                        .iter()
                        .map(|c| (c.id.clone(), c.message_count))
                        .collect();
                    if let ActiveView::Channel(channel_id) = &state.view {
                        if let Some(&total) = state.channel_totals.get(channel_id) {
                            self.read_state.set(channel_id, total);
                        }
                    }
                }
                None => state.channel_totals.clear(),
            }
            state.counters = fold_sources(
                counts.as_ref(),
                mailboxes.as_ref(),
                &self.mailboxes,
                self.read_state.as_ref(),
            );
            self.counters_tx.send_replace(state.counters);
        }

        let published = self.is_visible();
        if published {
            self.broadcaster.publish();
        }
        TickOutcome::Updated { published }
    }
}

/// Fold fetched sources into counters. A missing source contributes zero.
///
/// `mailbox_filter` limits which mailboxes feed the inbox figure; empty means
/// every reported mailbox.
pub fn fold_sources(
    counts: Option<&NotificationCounts>,
    mailboxes: Option<&MailboxUnreadCounts>,
    mailbox_filter: &[String],
    read_state: &dyn ReadStateStore,
) -> NotificationCounters {
    let inbox = mailboxes
        .map(|m| {
            m.counts
                .iter()
                .filter(|(id, _)| mailbox_filter.is_empty() || mailbox_filter.contains(id))
                .fold(0u64, |sum, (_, count)| sum.saturating_add(*count))
        })
        .unwrap_or(0);

    let mut counters = NotificationCounters {
        inbox,
        ..Default::default()
    };
    if let Some(counts) = counts {
        counters.contacts = counts.contacts;
        counters.careers = counts.careers;
        counters.open_issues = counts.open_issues;
        counters.chat = counts
            .channels
            .iter()
            .filter(|c| c.message_count > read_state.get(&c.id))
            .count() as u64;
    }
    counters.recompute_total();
    counters
}

/// Number of channels whose live total exceeds the stored read count.
pub fn count_unread_channels(totals: &HashMap<String, u64>, read_state: &dyn ReadStateStore) -> u64 {
    totals
        .iter()
        .filter(|(id, total)| **total > read_state.get(id))
        .count() as u64
}

/// Handle to the repeating counter task.
pub struct CounterPoller {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl CounterPoller {
    /// Start polling on the current runtime.
    pub fn spawn(counter: Arc<NotificationCounter>, period: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_counter_poller(counter, period, Arc::clone(&shutdown)));
        Self { handle, shutdown }
    }

    /// Stop the timer. A tick already in flight finishes on its own.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            log::warn!("Counter poller: task ended abnormally: {}", e);
        }
    }
}

/// Background counter poller.
///
/// - Idles until a credential is present
/// - Ticks immediately, then every `period`, and on wake-ups
/// - Resets counters and idles again when the credential is cleared
async fn run_counter_poller(
    counter: Arc<NotificationCounter>,
    period: Duration,
    shutdown: Arc<Notify>,
) {
    let mut session_rx = counter.session.subscribe();

    loop {
        while !counter.session.is_active() {
            tokio::select! {
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.notified() => return,
            }
        }

        log::info!("Counter poller: session active, polling every {}s", period.as_secs());
        let mut epoch = counter.session.epoch();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = counter.wake.notified() => {}
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !counter.session.is_active() {
                        log::info!("Counter poller: session ended, stopping");
                        counter.reset();
                        break;
                    }
                    // A sign-out and sign-in can arrive as one change.
                    let current = counter.session.epoch();
                    if current == epoch {
                        continue;
                    }
                    log::info!("Counter poller: session replaced, resetting counters");
                    epoch = current;
                    counter.reset();
                    ticker.reset();
                }
                _ = shutdown.notified() => return,
            }

            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                match counter.tick().await {
                    TickOutcome::AllSourcesFailed => {
                        log::warn!("Counter poller: every source failed, keeping previous counters")
                    }
                    outcome => log::debug!("Counter poller: tick {:?}", outcome),
                }
            });
        }
    }
}
