//! Display helpers for feed items and navigation badges (pure, no I/O).

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};

use crate::types::{FeedItem, LeadRef, LeadSummary};

/// Parse an RFC3339 timestamp, falling back to the SQLite datetime format.
///
/// Returns `None` for anything else; callers treat that as infinitely old.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn join_name(first: Option<&str>, last: Option<&str>) -> String {
    [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Name → "first last" → email → "Unknown".
pub fn lead_display_name(lead: &LeadSummary) -> String {
    if let Some(name) = lead.name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return name.to_string();
    }
    let joined = join_name(lead.first_name.as_deref(), lead.last_name.as_deref());
    if !joined.is_empty() {
        return joined;
    }
    fallback_to_email(&lead.email)
}

pub fn lead_ref_display_name(lead: &LeadRef) -> String {
    let joined = join_name(lead.first_name.as_deref(), lead.last_name.as_deref());
    if !joined.is_empty() {
        return joined;
    }
    fallback_to_email(&lead.email)
}

fn fallback_to_email(email: &str) -> String {
    let email = email.trim();
    if email.is_empty() {
        "Unknown".to_string()
    } else {
        email.to_string()
    }
}

/// "1 day" / "3 days".
pub fn days_label(days: i64) -> String {
    format!("{} day{}", days, if days == 1 { "" } else { "s" })
}

/// Short relative time ("just now", "5 min ago", "3 h ago", "2 days ago").
///
/// Unparsable timestamps render as an empty string.
pub fn relative_time(timestamp: &str, now: DateTime<Utc>) -> String {
    let Some(ts) = parse_timestamp(timestamp) else {
        return String::new();
    };
    let elapsed = now - ts;
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{} min ago", minutes)
    } else if elapsed.num_hours() < 24 {
        format!("{} h ago", elapsed.num_hours())
    } else {
        format!("{} ago", days_label(elapsed.num_days()))
    }
}

/// Group heading for a timestamp: "Today", "Yesterday", or "Monday, 12 October".
pub fn day_label(timestamp: &str, now: DateTime<Utc>) -> String {
    let Some(ts) = parse_timestamp(timestamp) else {
        return "Earlier".to_string();
    };
    let today = now.date_naive();
    let day = ts.date_naive();
    if day == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(day) {
        "Yesterday".to_string()
    } else if day.year() == today.year() {
        day.format("%A, %-d %B").to_string()
    } else {
        day.format("%A, %-d %B %Y").to_string()
    }
}

/// Group items under day headings, keeping feed order within and across groups.
pub fn group_by_day(items: &[FeedItem], now: DateTime<Utc>) -> Vec<(String, Vec<FeedItem>)> {
    let mut groups: Vec<(String, Vec<FeedItem>)> = Vec::new();
    for item in items {
        let label = day_label(&item.timestamp, now);
        match groups.iter_mut().find(|(l, _)| *l == label) {
            Some((_, group)) => group.push(item.clone()),
            None => groups.push((label, vec![item.clone()])),
        }
    }
    groups
}

/// Badge text for a counter; no badge for zero.
pub fn badge_label(count: u64) -> Option<String> {
    match count {
        0 => None,
        1..=9 => Some(count.to_string()),
        _ => Some("9+".to_string()),
    }
}
