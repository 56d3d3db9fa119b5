//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc, time::Duration};

use serde::Deserialize;

use super::types::Res;

/// Default database endpoint (in-memory).
fn default_db_endpoint() -> String {
    "mem://".to_string()
}

/// Default inactivity timeout before a claimed question is escalated.
fn default_inactivity_timeout_seconds() -> u64 {
    600
}

/// Default window after closing during which a question may be reopened.
fn default_reopen_window_hours() -> u64 {
    24
}

/// Default lifetime of transient notices.
fn default_ephemeral_notice_seconds() -> u64 {
    30
}

/// Inactivity escalation is on unless explicitly disabled.
fn default_timeout_feature_enabled() -> bool {
    true
}

/// What happens to a claimed question when its inactivity timer fires.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InactivityPolicy {
    /// Close the question and tell both parties it timed out.
    #[default]
    Close,
    /// Return the question to the open pool.
    Release,
}

/// Configuration for the duty desk.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// Slack app token (`SLACK_APP_TOKEN`).
    #[serde(default)]
    pub slack_app_token: String,
    /// Slack bot token (`SLACK_BOT_TOKEN`).
    #[serde(default)]
    pub slack_bot_token: String,
    /// Channel whose threads are question topics (`SUPPORT_CHANNEL_ID`).
    #[serde(default)]
    pub support_channel_id: String,
    /// Database endpoint URL (`DB_ENDPOINT`), e.g. `ws://localhost:8000` or `mem://`.
    #[serde(default = "default_db_endpoint")]
    pub db_endpoint: String,
    /// Database username (`DB_USERNAME`).
    #[serde(default)]
    pub db_username: Option<String>,
    /// Database password (`DB_PASSWORD`).
    #[serde(default)]
    pub db_password: Option<String>,
    /// Seconds without messages before a claimed question is escalated (`INACTIVITY_TIMEOUT_SECONDS`).
    #[serde(default = "default_inactivity_timeout_seconds")]
    pub inactivity_timeout_seconds: u64,
    /// Hours after closing during which the last duty may reopen (`REOPEN_WINDOW_HOURS`).
    #[serde(default = "default_reopen_window_hours")]
    pub reopen_window_hours: u64,
    /// Seconds before transient notices are removed (`EPHEMERAL_NOTICE_SECONDS`).
    #[serde(default = "default_ephemeral_notice_seconds")]
    pub ephemeral_notice_seconds: u64,
    /// Whether inactivity timers run at all (`TIMEOUT_FEATURE_ENABLED`).
    #[serde(default = "default_timeout_feature_enabled")]
    pub timeout_feature_enabled: bool,
    /// What an inactivity timeout does (`INACTIVITY_POLICY`).
    #[serde(default)]
    pub inactivity_policy: InactivityPolicy,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            slack_app_token: String::new(),
            slack_bot_token: String::new(),
            support_channel_id: String::new(),
            db_endpoint: default_db_endpoint(),
            db_username: None,
            db_password: None,
            inactivity_timeout_seconds: default_inactivity_timeout_seconds(),
            reopen_window_hours: default_reopen_window_hours(),
            ephemeral_notice_seconds: default_ephemeral_notice_seconds(),
            timeout_feature_enabled: default_timeout_feature_enabled(),
            inactivity_policy: InactivityPolicy::default(),
        }
    }
}

impl ConfigInner {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_seconds)
    }

    pub fn reopen_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reopen_window_hours as i64)
    }

    pub fn ephemeral_notice(&self) -> Duration {
        Duration::from_secs(self.ephemeral_notice_seconds)
    }
}

impl Config {
    pub fn new(inner: ConfigInner) -> Res<Self> {
        let result = Config { inner: Arc::new(inner) };
        result.validate()?;

        Ok(result)
    }

    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default().prefix("DUTY_DESK"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        Self::new(cfg.build()?.try_deserialize()?)
    }

    fn validate(&self) -> Res<()> {
        if self.inactivity_timeout_seconds < 1 {
            return Err(anyhow::anyhow!("Inactivity timeout must be at least 1 second."));
        }

        if self.reopen_window_hours < 1 || self.reopen_window_hours > 24 * 365 {
            return Err(anyhow::anyhow!("Reopen window must be between 1 hour and 1 year."));
        }

        if self.ephemeral_notice_seconds < 1 {
            return Err(anyhow::anyhow!("Ephemeral notice lifetime must be at least 1 second."));
        }

        Ok(())
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_desk_policy() {
        let config = Config::new(ConfigInner::default()).unwrap();

        assert_eq!(config.reopen_window(), chrono::Duration::hours(24));
        assert_eq!(config.ephemeral_notice(), Duration::from_secs(30));
        assert!(config.timeout_feature_enabled);
        assert_eq!(config.inactivity_policy, InactivityPolicy::Close);
        assert_eq!(config.db_endpoint, "mem://");
    }

    #[test]
    fn rejects_zero_timeouts() {
        let inner = ConfigInner {
            inactivity_timeout_seconds: 0,
            ..Default::default()
        };
        assert!(Config::new(inner).is_err());

        let inner = ConfigInner {
            ephemeral_notice_seconds: 0,
            ..Default::default()
        };
        assert!(Config::new(inner).is_err());

        let inner = ConfigInner {
            reopen_window_hours: 0,
            ..Default::default()
        };
        assert!(Config::new(inner).is_err());
    }

    #[test]
    fn policy_parses_from_snake_case() {
        let policy: InactivityPolicy = serde_json::from_value(serde_json::json!("release")).unwrap();
        assert_eq!(policy, InactivityPolicy::Release);
    }
}
