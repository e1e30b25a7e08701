use serde::{Deserialize, Serialize};

use super::page::DEFAULT_PAGE_SIZE;

/// Top-level client settings container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClientSettings {
    pub backend: BackendKind,
    pub hosted: HostedSettings,
    pub local: LocalSettings,
    pub view: ViewSettings,
    pub auth: AuthSettings,
}

/// Which data service implementation the client talks to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Hosted,
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostedSettings {
    pub base_url: String,
    pub anon_key: String,
    /// Interval between change-fingerprint polls backing realtime refresh.
    pub realtime_poll_ms: u64,
    pub timeout_secs: u64,
}

impl Default for HostedSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            anon_key: String::new(),
            realtime_poll_ms: 2000,
            timeout_secs: 15,
        }
    }
}

/// Settings for the SQLite-backed local backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalSettings {
    /// Database file. `None` uses `<data dir>/linkshelf.db`.
    pub database_path: Option<String>,
    /// Email of the user the local session signs in as.
    pub user_email: String,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            user_email: "me@localhost".to_string(),
        }
    }
}

/// Bookmark list presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewSettings {
    pub page_size: usize,
    pub notice_ttl_ms: u64,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            notice_ttl_ms: 5000,
        }
    }
}

/// OAuth redirect configuration handed to the UI shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    pub provider: String,
    pub callback_url: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            callback_url: "http://localhost:3000/auth/callback".to_string(),
        }
    }
}
