//! Database connection configuration.

use serde::{Deserialize, Serialize};

/// Default local database file.
fn default_url() -> String {
    String::from("taskhub.db")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Local file path, `:memory:`, or a remote `libsql://` / `https://` URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Auth token for remote databases. Ignored for local files.
    #[serde(default)]
    pub auth_token: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth_token: String::new(),
        }
    }
}

impl DatabaseConfig {
    /// Whether the URL points at a remote server rather than a local file.
    pub fn is_remote(&self) -> bool {
        ["libsql://", "https://", "http://", "wss://", "ws://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme))
    }

    /// Check the minimum fields needed to open the database.
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && (!self.is_remote() || !self.auth_token.is_empty())
    }
}
