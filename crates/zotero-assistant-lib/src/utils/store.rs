// Settings store
// Loads and saves assistant settings as JSON under the platform config dir.

use std::path::{Path, PathBuf};

use crate::models::settings::AssistantSettings;

/// Directory name under the platform config/data dirs
pub const APP_IDENTIFIER: &str = "zotero-assistant";

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Environment variable overriding the backend URL
pub const ENV_BACKEND_URL: &str = "ZOTERO_ASSISTANT_BACKEND_URL";

/// Environment variable overriding the auth token
pub const ENV_AUTH_TOKEN: &str = "ZOTERO_ASSISTANT_TOKEN";

/// JSON file holding `AssistantSettings`
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the default location
    pub fn open_default() -> Result<Self, String> {
        Ok(Self::new(get_settings_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing file yields defaults
    pub fn load(&self) -> Result<AssistantSettings, String> {
        if !self.path.exists() {
            return Ok(AssistantSettings::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read settings: {}", e))?;
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))
    }

    /// Save settings atomically (temp file + rename)
    pub fn save(&self, settings: &AssistantSettings) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }

        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| format!("Failed to replace settings: {}", e))?;

        log::info!("Settings saved to {}", self.path.display());
        Ok(())
    }

    /// Load settings and apply environment overrides (after reading `.env`)
    pub fn load_with_env(&self) -> Result<AssistantSettings, String> {
        let _ = dotenvy::dotenv();
        let mut settings = self.load()?;
        apply_env_overrides(&mut settings);
        Ok(settings)
    }
}

/// Default settings path under the platform config directory
pub fn get_settings_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|p| p.join(APP_IDENTIFIER).join(SETTINGS_FILE))
        .ok_or_else(|| "Could not determine configuration directory".to_string())
}

/// Apply `ZOTERO_ASSISTANT_*` environment overrides
pub fn apply_env_overrides(settings: &mut AssistantSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

fn apply_overrides_from<F>(settings: &mut AssistantSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
        log::info!("Backend URL overridden from environment");
        settings.backend_url = url.trim().to_string();
    }
    if let Some(token) = lookup(ENV_AUTH_TOKEN).filter(|v| !v.trim().is_empty()) {
        settings.auth_token = Some(token.trim().to_string());
    }
}
