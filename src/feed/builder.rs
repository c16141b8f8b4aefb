use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use super::format::{days_label, lead_display_name, lead_ref_display_name, parse_timestamp};
use crate::types::{
    ActivityKind, ActivityRecord, FeedItem, FeedItemKind, LeadSummary, PendingAction,
    StatusTransition,
};

/// Records older than this never reach the feed.
pub const LOOKBACK_DAYS: i64 = 7;

/// A lead needing attention becomes overdue past this age.
pub const STALE_AFTER_DAYS: i64 = 2;

/// Raw records a view already holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedSources<'a> {
    pub leads: &'a [LeadSummary],
    pub activities: &'a [ActivityRecord],
    pub needing_attention: &'a [LeadSummary],
}

pub fn build_feed(sources: &FeedSources<'_>, now: DateTime<Utc>) -> Vec<FeedItem> {
    let horizon = now - Duration::days(LOOKBACK_DAYS);
    let within_window =
        |ts: &str| parse_timestamp(ts).map(|t| t >= horizon).unwrap_or(false);

    let mut items = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut fresh_leads: HashSet<&str> = HashSet::new();

    for lead in sources.leads.iter().filter(|l| within_window(&l.created_at)) {
        let item = new_lead_item(lead);
        if seen_ids.insert(item.id.clone()) {
            fresh_leads.insert(lead.id.as_str());
            items.push(item);
        }
    }

    for activity in sources.activities.iter().filter(|a| within_window(&a.created_at)) {
        let Some(item) = activity_item(activity) else {
            continue;
        };
        if seen_ids.insert(item.id.clone()) {
            items.push(item);
        }
    }

    for lead in sources.needing_attention {
        if fresh_leads.contains(lead.id.as_str()) {
            continue;
        }
        let Some(days) = lead_age_days(lead, now) else {
            continue;
        };
        if days <= STALE_AFTER_DAYS {
            continue;
        }
        let item = overdue_item(lead, days);
        if seen_ids.insert(item.id.clone()) {
            items.push(item);
        }
    }

    sort_feed(&mut items);
    items
}

/// Priority ascending, newest first within a priority. Unparsable timestamps sink.
pub fn sort_feed(items: &mut [FeedItem]) {
    items.sort_by_cached_key(|item| (item.priority, Reverse(parse_timestamp(&item.timestamp))));
}

fn lead_age_days(lead: &LeadSummary, now: DateTime<Utc>) -> Option<i64> {
    lead.days_since_created
        .or_else(|| parse_timestamp(&lead.created_at).map(|t| (now - t).num_days()))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn new_lead_item(lead: &LeadSummary) -> FeedItem {
    let summary = match lead.property_title.as_deref().and_then(non_empty) {
        Some(title) => format!("New inquiry for {}", title),
        None => "New inquiry".to_string(),
    };

    FeedItem {
        id: format!("lead-{}", lead.id),
        kind: FeedItemKind::NewLead,
        priority: FeedItemKind::NewLead.priority(),
        lead_id: Some(lead.id.clone()),
        title: lead_display_name(lead),
        summary,
        timestamp: lead.created_at.clone(),
        email: non_empty(&lead.email),
        phone: lead.phone.as_deref().and_then(non_empty),
        days_since: None,
        status_change: None,
        pending_action: None,
        created_by: None,
        source_kind: None,
    }
}

fn overdue_item(lead: &LeadSummary, days: i64) -> FeedItem {
    FeedItem {
        id: format!("overdue-{}", lead.id),
        kind: FeedItemKind::Overdue,
        priority: FeedItemKind::Overdue.priority(),
        lead_id: Some(lead.id.clone()),
        title: lead_display_name(lead),
        summary: format!("Waiting for a first reply for {}", days_label(days)),
        timestamp: lead.created_at.clone(),
        email: non_empty(&lead.email),
        phone: lead.phone.as_deref().and_then(non_empty),
        days_since: Some(days),
        status_change: None,
        pending_action: None,
        created_by: None,
        source_kind: None,
    }
}

fn activity_item(activity: &ActivityRecord) -> Option<FeedItem> {
    let awaiting_answer = activity
        .pending_action
        .as_ref()
        .is_some_and(PendingAction::is_open);
    let kind = if activity.kind.is_inbound() || activity.kind.is_agent() || awaiting_answer {
        FeedItemKind::ReplyReceived
    } else if activity.kind.is_status_change() {
        FeedItemKind::StatusChange
    } else {
        return None;
    };

    let status_change = match kind {
        FeedItemKind::StatusChange => status_transition(activity.metadata.as_ref()),
        _ => None,
    };

    let summary = non_empty(&activity.description)
        .or_else(|| non_empty(&default_summary(activity.kind, status_change.as_ref())))
        .or_else(|| {
            activity
                .pending_action
                .as_ref()
                .and_then(|action| non_empty(&action.question))
        })
        .unwrap_or_default();

    let lead_id = activity.lead_id.clone().or_else(|| {
        activity
            .lead
            .as_ref()
            .and_then(|lead| non_empty(&lead.id))
    });

    Some(FeedItem {
        id: format!("activity-{}", activity.id),
        kind,
        priority: kind.priority(),
        lead_id,
        title: activity_title(activity),
        summary,
        timestamp: activity.created_at.clone(),
        email: activity.lead.as_ref().and_then(|lead| non_empty(&lead.email)),
        phone: None,
        days_since: None,
        status_change,
        pending_action: activity.pending_action.clone(),
        created_by: activity.created_by.clone(),
        source_kind: Some(activity.kind),
    })
}

fn activity_title(activity: &ActivityRecord) -> String {
    if let Some(lead) = &activity.lead {
        return lead_ref_display_name(lead);
    }
    if let Some(name) = activity.lead_name.as_deref().and_then(non_empty) {
        return name;
    }
    activity
        .lead_id
        .as_deref()
        .and_then(non_empty)
        .unwrap_or_else(|| "Unknown".to_string())
}

fn status_transition(metadata: Option<&serde_json::Value>) -> Option<StatusTransition> {
    let metadata = metadata?;
    let field = |key: &str| {
        metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
    };
    let from = field("oldStatus");
    let to = field("newStatus");
    if from.is_none() && to.is_none() {
        return None;
    }
    Some(StatusTransition { from, to })
}

fn default_summary(kind: ActivityKind, transition: Option<&StatusTransition>) -> String {
    match kind {
        ActivityKind::EmailReceived => "Replied by email".to_string(),
        ActivityKind::PortalInquiry => "Sent a portal inquiry".to_string(),
        ActivityKind::LinkClickRequired => "Open the portal link to read the inquiry".to_string(),
        ActivityKind::AgentQuery => "The assistant needs a decision".to_string(),
        ActivityKind::AgentReply => "The assistant replied".to_string(),
        ActivityKind::StatusChanged => match transition.and_then(|t| t.to.as_deref()) {
            Some(to) => format!("Status changed to {}", to),
            None => "Status changed".to_string(),
        },
        _ => String::new(),
    }
}
