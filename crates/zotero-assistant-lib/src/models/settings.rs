// Assistant settings
// User preferences persisted by the settings store.

use serde::{Deserialize, Serialize};
use url::Url;

use super::request::ModelSelection;
use crate::error::{AssistantError, AssistantResult};

/// Default backend base URL
fn default_backend_url() -> String {
    String::from("http://127.0.0.1:8000")
}

/// Default websocket endpoint path
fn default_ws_path() -> String {
    String::from("/api/v1/agent/ws")
}

/// Default HTTP timeout for backend calls
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_settings_version() -> u32 {
    1
}

/// Assistant preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantSettings {
    /// Settings version for migration
    #[serde(default = "default_settings_version")]
    pub version: u32,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Authenticated user; sending is refused without one
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub selected_model: Option<ModelSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            version: default_settings_version(),
            backend_url: default_backend_url(),
            ws_path: default_ws_path(),
            user_id: None,
            auth_token: None,
            selected_model: None,
            custom_instructions: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AssistantSettings {
    /// Websocket endpoint derived from the backend URL (http -> ws, https -> wss)
    pub fn websocket_url(&self) -> AssistantResult<Url> {
        let mut url = Url::parse(&self.backend_url)
            .map_err(|e| AssistantError::InvalidConfig(format!("backend_url: {}", e)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(AssistantError::InvalidConfig(format!(
                    "Unsupported backend scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| AssistantError::InvalidConfig("Cannot set websocket scheme".to_string()))?;
        url.set_path(&self.ws_path);
        Ok(url)
    }

    /// Absolute URL of a backend HTTP endpoint
    pub fn api_url(&self, path: &str) -> AssistantResult<Url> {
        let base = Url::parse(&self.backend_url)
            .map_err(|e| AssistantError::InvalidConfig(format!("backend_url: {}", e)))?;
        base.join(path)
            .map_err(|e| AssistantError::InvalidConfig(format!("{}: {}", path, e)))
    }

    /// Custom instructions, ignoring blank values
    pub fn instructions(&self) -> Option<String> {
        self.custom_instructions
            .as_ref()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings: AssistantSettings = serde_json::from_str(r#"{"userId":"u1"}"#).unwrap();
        assert_eq!(settings.backend_url, "http://127.0.0.1:8000");
        assert_eq!(settings.request_timeout_secs, 30);
        assert_eq!(settings.user_id.as_deref(), Some("u1"));
        assert!(settings.selected_model.is_none());
    }

    #[test]
    fn test_websocket_url() {
        let mut settings = AssistantSettings::default();
        assert_eq!(
            settings.websocket_url().unwrap().as_str(),
            "ws://127.0.0.1:8000/api/v1/agent/ws"
        );

        settings.backend_url = "https://assistant.example.org".to_string();
        assert_eq!(
            settings.websocket_url().unwrap().as_str(),
            "wss://assistant.example.org/api/v1/agent/ws"
        );

        settings.backend_url = "ftp://nope".to_string();
        assert!(settings.websocket_url().is_err());
    }

    #[test]
    fn test_blank_instructions_ignored() {
        let mut settings = AssistantSettings::default();
        settings.custom_instructions = Some("   ".to_string());
        assert!(settings.instructions().is_none());
        settings.custom_instructions = Some(" Be brief. ".to_string());
        assert_eq!(settings.instructions().as_deref(), Some("Be brief."));
    }
}
