//! Leadpulse console runner.
//!
//! Loads ~/.leadpulse/config.json, starts the counter poller, mounts a feed
//! view on the refresh signal and prints the feed and navigation counters as
//! they change. Exits on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use leadpulse_lib::backend::{Backend, HttpBackend};
use leadpulse_lib::counter::{CounterPoller, NotificationCounter};
use leadpulse_lib::feed::format::{badge_label, relative_time};
use leadpulse_lib::read_state::open_read_state_store;
use leadpulse_lib::refresh::RefreshBroadcaster;
use leadpulse_lib::state::{initial_token, load_config, Session, TOKEN_ENV_VAR};
use leadpulse_lib::types::NotificationCounters;
use leadpulse_lib::view::{FeedView, FetchMode, RefreshOutcome};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            log::error!("{}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    let session = Arc::new(Session::new(initial_token(&config)));
    if !session.is_active() {
        log::warn!(
            "No credential configured. Set {} or apiToken in the config file.",
            TOKEN_ENV_VAR
        );
    }

    let backend: Arc<dyn Backend> = match HttpBackend::new(&config, Arc::clone(&session)) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let read_state = open_read_state_store(&config.read_state);
    let broadcaster = RefreshBroadcaster::new();
    let counter = Arc::new(NotificationCounter::new(
        Arc::clone(&backend),
        Arc::clone(&session),
        read_state,
        broadcaster.clone(),
        config.mailboxes.clone(),
    ));

    let view = Arc::new(FeedView::new(Arc::clone(&backend), config.activity_limit));
    view.mount(&broadcaster);
    let mut applied_rx = view.subscribe_applied();
    if let RefreshOutcome::Failed(err) = view.refresh(FetchMode::Loud).await {
        log::warn!("{} {}", err.message, err.recovery_suggestion);
    }
    print_feed(&view);
    applied_rx.borrow_and_update();

    let mut counters_rx = counter.subscribe_counters();
    let poller = CounterPoller::spawn(
        Arc::clone(&counter),
        Duration::from_secs(config.poll_interval_secs),
    );

    loop {
        tokio::select! {
            applied = applied_rx.changed() => {
                if applied.is_err() {
                    break;
                }
                applied_rx.borrow_and_update();
                print_feed(&view);
            }
            changed = counters_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let counters = *counters_rx.borrow_and_update();
                print_counters(&counters);
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    view.unmount();
    poller.stop().await;
}

fn print_feed(view: &FeedView) {
    let now = Utc::now();
    for (day, items) in view.grouped_items(now) {
        println!("== {} ==", day);
        for item in items {
            let pending = if item.pending_action.is_some() { " [awaiting answer]" } else { "" };
            println!(
                "  [{}] {} - {} ({}){}",
                item.priority,
                item.title,
                item.summary,
                relative_time(&item.timestamp, now),
                pending
            );
        }
    }
}

fn print_counters(counters: &NotificationCounters) {
    println!(
        "inbox {} | contacts {} | careers {} | issues {} | chat {} | badge {}",
        counters.inbox,
        counters.contacts,
        counters.careers,
        counters.open_issues,
        counters.chat,
        badge_label(counters.total).unwrap_or_else(|| "-".to_string())
    );
}
