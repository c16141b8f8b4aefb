//! HTTP implementation of [`Backend`] over the CRM REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use super::{validate_response, Backend};
use crate::error::FeedError;
use crate::state::Session;
use crate::types::{
    ActivityRecord, Config, LeadOverview, MailboxUnreadCounts, NotificationCounts, RecentActivity,
};

pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    session: Arc<Session>,
    timeout_secs: u64,
}

impl HttpBackend {
    pub fn new(config: &Config, session: Arc<Session>) -> Result<Self, FeedError> {
        config.validate()?;
        let base = Url::parse(&config.api_base_url)
            .map_err(|e| FeedError::Config(format!("Invalid apiBaseUrl: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FeedError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            session,
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Append path segments to the base URL, keeping any base path prefix.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, FeedError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FeedError::Config(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn token(&self) -> Result<String, FeedError> {
        self.session.token().ok_or(FeedError::NoSession)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, FeedError> {
        let token = self.token()?;
        let resp = request.bearer_auth(token).send().await.map_err(|e| {
            if e.is_timeout() {
                FeedError::Timeout(self.timeout_secs)
            } else {
                FeedError::from(e)
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FeedError::Unauthorized);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FeedError> {
        log::debug!("GET {}", url.path());
        let resp = self.send(self.client.get(url)).await?;
        resp.json::<T>()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn recent_activity(&self, limit: u32) -> Result<RecentActivity, FeedError> {
        let mut url = self.endpoint(&["activities"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get_json(url).await
    }

    async fn lead_overview(&self) -> Result<LeadOverview, FeedError> {
        self.get_json(self.endpoint(&["dashboard", "stats"])?).await
    }

    async fn notification_counts(&self) -> Result<NotificationCounts, FeedError> {
        self.get_json(self.endpoint(&["notifications", "counts"])?)
            .await
    }

    async fn mailbox_unread_counts(&self) -> Result<MailboxUnreadCounts, FeedError> {
        self.get_json(self.endpoint(&["admin", "emails", "unread-counts"])?)
            .await
    }

    async fn respond_to_pending_action(
        &self,
        action_id: &str,
        response: &str,
    ) -> Result<ActivityRecord, FeedError> {
        let response = validate_response(response)?;
        let url = self.endpoint(&["jarvis", "actions", action_id, "respond"])?;
        log::debug!("POST {}", url.path());
        let resp = self
            .send(self.client.post(url).json(&json!({ "response": response })))
            .await?;
        resp.json::<ActivityRecord>()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))
    }

    async fn cancel_pending_action(
        &self,
        action_id: &str,
        reason: Option<&str>,
    ) -> Result<(), FeedError> {
        let url = self.endpoint(&["jarvis", "actions", action_id, "cancel"])?;
        log::debug!("POST {}", url.path());
        self.send(self.client.post(url).json(&json!({ "reason": reason })))
            .await?;
        Ok(())
    }
}
