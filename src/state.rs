use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::error::FeedError;
use crate::types::Config;

/// Environment variable that overrides `apiToken` from the config file.
pub const TOKEN_ENV_VAR: &str = "LEADPULSE_TOKEN";

/// The operator's credential, observable by background pollers.
///
/// Every sign-in and sign-out bumps the epoch. A task that captured the epoch
/// before an await compares it afterwards and drops its result when the
/// session changed in between.
pub struct Session {
    token: watch::Sender<Option<String>>,
    epoch: AtomicU64,
}

impl Session {
    pub fn new(token: Option<String>) -> Self {
        let (sender, _) = watch::channel(token.filter(|t| !t.is_empty()));
        Self {
            token: sender,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            log::warn!("Session: ignoring sign-in with an empty credential");
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.token.send_replace(Some(token));
        log::info!("Session: signed in");
    }

    pub fn sign_out(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.token.send_replace(None);
        log::info!("Session: signed out");
    }

    pub fn token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.token.borrow().is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Watch credential changes. The receiver starts with the current value
    /// marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::signed_out()
    }
}

/// Get the canonical config file path (~/.leadpulse/config.json)
pub fn config_path() -> Result<PathBuf, FeedError> {
    let home = dirs::home_dir()
        .ok_or_else(|| FeedError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".leadpulse").join("config.json"))
}

/// Load configuration from ~/.leadpulse/config.json
pub fn load_config() -> Result<Config, FeedError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config, FeedError> {
    if !path.exists() {
        return Err(FeedError::ConfigNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| FeedError::Config(format!("Failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Credential to start with: the environment wins over the config file.
pub fn initial_token(config: &Config) -> Option<String> {
    std::env::var(TOKEN_ENV_VAR)
        .ok()
        .filter(|token| !token.is_empty())
        .or_else(|| config.api_token.clone())
}

impl Config {
    pub fn validate(&self) -> Result<(), FeedError> {
        let base = url::Url::parse(&self.api_base_url).map_err(|e| {
            FeedError::Config(format!("Invalid apiBaseUrl '{}': {}", self.api_base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(FeedError::Config(format!(
                "apiBaseUrl '{}' cannot be used as a base URL",
                self.api_base_url
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(FeedError::Config(
                "pollIntervalSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_and_out_bump_epoch() {
        let session = Session::signed_out();
        assert!(!session.is_active());
        assert_eq!(session.epoch(), 0);

        session.sign_in("tok");
        assert!(session.is_active());
        assert_eq!(session.token().as_deref(), Some("tok"));
        assert_eq!(session.epoch(), 1);

        session.sign_out();
        assert!(!session.is_active());
        assert_eq!(session.epoch(), 2);
    }

    #[test]
    fn empty_credential_is_ignored() {
        let session = Session::new(Some(String::new()));
        assert!(!session.is_active());
        session.sign_in("");
        assert!(!session.is_active());
        assert_eq!(session.epoch(), 0);
    }

    #[tokio::test]
    async fn subscribers_observe_sign_out() {
        let session = Session::new(Some("tok".to_string()));
        let mut rx = session.subscribe();
        session.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }

    #[test]
    fn load_config_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_from(&dir.path().join("config.json")).unwrap_err();
        assert!(matches!(err, FeedError::ConfigNotFound(_)));
    }

    #[test]
    fn load_config_from_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "apiBaseUrl": "https://crm.example.com/api", "pollIntervalSecs": 30, "mailboxes": ["info"] }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.mailboxes, vec!["info".to_string()]);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(Config::new("not a url").validate().is_err());
        assert!(Config::new("mailto:ops@example.com").validate().is_err());

        let mut config = Config::new("https://crm.example.com");
        assert!(config.validate().is_ok());
        config.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(FeedError::Config(_))));
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(load_config_from(&path), Err(FeedError::Config(_))));
    }
}
