use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Last-seen message count per chat channel.
pub type ReadStateMap = BTreeMap<String, u64>;

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a list record by record, dropping entries that do not decode.
/// Anything other than an array reads as empty.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let serde_json::Value::Array(entries) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                log::debug!("Skipping malformed record: {}", e);
                None
            }
        })
        .collect())
}

/// A count that is missing, null, negative or not a number reads as 0.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(serde_json::Value::deserialize(deserializer)?
        .as_u64()
        .unwrap_or(0))
}

fn lenient_count_map<'de, D>(deserializer: D) -> Result<HashMap<String, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Object(entries) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(HashMap::new());
    };
    Ok(entries
        .into_iter()
        .map(|(key, count)| (key, count.as_u64().unwrap_or(0)))
        .collect())
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration stored in ~/.leadpulse/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub api_base_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_activity_limit")]
    pub activity_limit: u32,
    /// Mailboxes summed into the inbox counter. Empty means every reported mailbox.
    #[serde(default)]
    pub mailboxes: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub read_state: ReadStateConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_activity_limit() -> u32 {
    100
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn new(api_base_url: &str) -> Self {
        Self {
            api_base_url: api_base_url.to_string(),
            poll_interval_secs: default_poll_interval_secs(),
            activity_limit: default_activity_limit(),
            mailboxes: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            read_state: ReadStateConfig::default(),
            api_token: None,
        }
    }
}

/// Where the chat read-state map is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStateConfig {
    #[serde(default)]
    pub backend: ReadStateBackend,
    /// Overrides the default location under ~/.leadpulse/.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStateBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

// =============================================================================
// Backend records
// =============================================================================

/// Kind of event recorded against a lead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    LeadCreated,
    StatusChanged,
    FieldUpdated,
    EmailSent,
    EmailReceived,
    NoteAdded,
    PropertyAssigned,
    PortalInquiry,
    ExposeSent,
    ViewingScheduled,
    ViewingDone,
    #[serde(rename = "JARVIS_QUERY")]
    AgentQuery,
    AgentReply,
    LinkClickRequired,
    #[default]
    #[serde(other)]
    Other,
}

impl ActivityKind {
    /// A message that arrived from the lead, including portal inquiries that
    /// need a link opened before they can be answered.
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            ActivityKind::EmailReceived
                | ActivityKind::PortalInquiry
                | ActivityKind::LinkClickRequired
        )
    }

    /// Something the assistant produced that the operator should look at.
    pub fn is_agent(self) -> bool {
        matches!(self, ActivityKind::AgentQuery | ActivityKind::AgentReply)
    }

    pub fn is_status_change(self) -> bool {
        self == ActivityKind::StatusChanged
    }
}

/// Minimal lead reference embedded in an activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
}

/// Timestamped event describing something that happened to a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: String,
    #[serde(default)]
    pub lead_id: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: ActivityKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub lead: Option<LeadRef>,
    /// Flattened name, as sent by the lead overview.
    #[serde(default)]
    pub lead_name: Option<String>,
    #[serde(default, alias = "jarvisAction")]
    pub pending_action: Option<PendingAction>,
}

/// One selectable answer for a pending action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOption {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingActionStatus {
    #[default]
    Pending,
    Resolved,
    Cancelled,
    #[serde(other)]
    Other,
}

/// Assistant-generated question awaiting the operator's choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub question: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub options: Vec<ActionOption>,
    #[serde(default)]
    pub allow_custom: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: PendingActionStatus,
}

impl PendingAction {
    pub fn is_open(&self) -> bool {
        self.status == PendingActionStatus::Pending
    }
}

/// Contact and status snapshot of a lead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub property_title: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(default)]
    pub days_since_created: Option<i64>,
}

/// `GET /activities` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub activities: Vec<ActivityRecord>,
    #[serde(default)]
    pub current_user_id: Option<String>,
}

/// Lead buckets inside the overview response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadBuckets {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub recent: Vec<LeadSummary>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub needing_attention: Vec<LeadSummary>,
}

/// `GET /dashboard/stats` response, reduced to what the feed consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadOverview {
    #[serde(default)]
    pub leads: LeadBuckets,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub activities: Vec<ActivityRecord>,
}

/// Live message total for one team chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCount {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub message_count: u64,
}

/// `GET /notifications/counts` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCounts {
    #[serde(default, deserialize_with = "lenient_count")]
    pub contacts: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub careers: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub open_issues: u64,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub channels: Vec<ChannelCount>,
}

/// `GET /admin/emails/unread-counts` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxUnreadCounts {
    #[serde(default, deserialize_with = "lenient_count_map")]
    pub counts: HashMap<String, u64>,
}

// =============================================================================
// Derived records
// =============================================================================

/// Feed entry kind. The discriminant order is the display priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedItemKind {
    NewLead,
    ReplyReceived,
    Overdue,
    StatusChange,
}

impl FeedItemKind {
    pub fn priority(self) -> u8 {
        match self {
            FeedItemKind::NewLead => 1,
            FeedItemKind::ReplyReceived => 2,
            FeedItemKind::Overdue => 3,
            FeedItemKind::StatusChange => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Render-only feed entry. Built fresh on every call, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: String,
    pub kind: FeedItemKind,
    pub priority: u8,
    pub lead_id: Option<String>,
    pub title: String,
    pub summary: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_since: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_change: Option<StatusTransition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<ActivityKind>,
}

/// Aggregate unread/pending figures shown in the navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCounters {
    pub inbox: u64,
    pub contacts: u64,
    pub careers: u64,
    pub open_issues: u64,
    /// Channels with unread content, not unread messages.
    pub chat: u64,
    /// Badge figure: every category except the inbox.
    pub total: u64,
}

impl NotificationCounters {
    pub fn recompute_total(&mut self) {
        self.total = [self.careers, self.open_issues, self.chat]
            .into_iter()
            .fold(self.contacts, u64::saturating_add);
    }

    pub fn set_chat(&mut self, chat: u64) {
        self.chat = chat;
        self.recompute_total();
    }
}
