// Linkshelf Settings Engine
// Manages client settings: loading, saving, updating individual values, and resetting to defaults.
// Settings are stored as a JSON file at the platform-specific config path, with environment overrides.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::platform;
use crate::types::errors::SettingsError;
use crate::types::settings::{BackendKind, ClientSettings};

/// Environment variables that override values from the settings file.
pub const ENV_BACKEND: &str = "LINKSHELF_BACKEND";
pub const ENV_URL: &str = "LINKSHELF_URL";
pub const ENV_ANON_KEY: &str = "LINKSHELF_ANON_KEY";
pub const ENV_DATABASE: &str = "LINKSHELF_DATABASE";
pub const ENV_USER_EMAIL: &str = "LINKSHELF_USER_EMAIL";

/// Trait defining the settings engine interface.
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<ClientSettings, SettingsError>;
    fn save(&self) -> Result<(), SettingsError>;
    fn get_settings(&self) -> &ClientSettings;
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), SettingsError>;
    fn apply_env_overrides(&mut self, vars: &HashMap<String, String>) -> Result<(), SettingsError>;
    fn reset(&mut self) -> Result<(), SettingsError>;
    fn get_config_path(&self) -> &str;
}

/// Settings engine implementation that persists settings as JSON on disk.
///
/// `stored` mirrors the file; `settings` is `stored` with the environment
/// overrides laid over it. Only `stored` is ever written back.
pub struct SettingsEngine {
    config_path: String,
    stored: ClientSettings,
    overrides: HashMap<String, String>,
    settings: ClientSettings,
}

impl SettingsEngine {
    /// Creates a new SettingsEngine.
    ///
    /// If `path_override` is `Some`, uses that path for the config file.
    /// Otherwise, uses the platform-specific config directory with `settings.json`.
    pub fn new(path_override: Option<String>) -> Self {
        let config_path = match path_override {
            Some(p) => p,
            None => platform::get_config_dir()
                .join("settings.json")
                .to_string_lossy()
                .to_string(),
        };

        Self {
            config_path,
            stored: ClientSettings::default(),
            overrides: HashMap::new(),
            settings: ClientSettings::default(),
        }
    }

    /// Loads the file and then applies overrides from the process environment.
    pub fn load_with_env(&mut self) -> Result<ClientSettings, SettingsError> {
        self.load()?;
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("LINKSHELF_"))
            .collect();
        self.apply_env_overrides(&vars)?;
        Ok(self.settings.clone())
    }

    /// The settings as they are on disk, without environment overrides.
    pub fn get_stored_settings(&self) -> &ClientSettings {
        &self.stored
    }

    /// Makes `stored` current, re-applying the remembered overrides.
    fn install(&mut self, stored: ClientSettings) -> Result<(), SettingsError> {
        let effective = overlay(&stored, &self.overrides)?;
        self.stored = stored;
        self.settings = effective;
        Ok(())
    }
}

/// `base` with `LINKSHELF_*` overrides from `vars` applied, validated.
fn overlay(
    base: &ClientSettings,
    vars: &HashMap<String, String>,
) -> Result<ClientSettings, SettingsError> {
    let mut settings = base.clone();
    if let Some(backend) = vars.get(ENV_BACKEND) {
        settings.backend = match backend.to_ascii_lowercase().as_str() {
            "local" => BackendKind::Local,
            "hosted" => BackendKind::Hosted,
            other => {
                return Err(SettingsError::InvalidValue(format!(
                    "{} must be 'local' or 'hosted', got '{}'",
                    ENV_BACKEND, other
                )))
            }
        };
    }
    if let Some(url) = vars.get(ENV_URL) {
        settings.hosted.base_url = url.clone();
    }
    if let Some(key) = vars.get(ENV_ANON_KEY) {
        settings.hosted.anon_key = key.clone();
    }
    if let Some(path) = vars.get(ENV_DATABASE) {
        settings.local.database_path = Some(path.clone());
    }
    if let Some(email) = vars.get(ENV_USER_EMAIL) {
        settings.local.user_email = email.clone();
    }
    validate(&settings)?;
    Ok(settings)
}

/// Rejects settings the client cannot run with.
pub fn validate(settings: &ClientSettings) -> Result<(), SettingsError> {
    if settings.view.page_size == 0 {
        return Err(SettingsError::InvalidValue(
            "view.page_size must be at least 1".to_string(),
        ));
    }
    if settings.view.notice_ttl_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "view.notice_ttl_ms must be positive".to_string(),
        ));
    }
    if settings.backend == BackendKind::Hosted && settings.hosted.base_url.is_empty() {
        return Err(SettingsError::InvalidValue(
            "hosted.base_url is required for the hosted backend".to_string(),
        ));
    }
    Ok(())
}

impl SettingsEngineTrait for SettingsEngine {
    /// Loads settings from the JSON config file.
    ///
    /// If the file does not exist, returns default settings.
    /// If the file exists but is malformed, returns a serialization error.
    fn load(&mut self) -> Result<ClientSettings, SettingsError> {
        let path = Path::new(&self.config_path);

        if !path.exists() {
            debug!(path = %self.config_path, "no settings file, using defaults");
            self.install(ClientSettings::default())?;
            return Ok(self.settings.clone());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| SettingsError::IoError(format!("Failed to read config file: {}", e)))?;

        let settings: ClientSettings = serde_json::from_str(&content).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to parse config file: {}", e))
        })?;
        validate(&settings)?;

        self.install(settings)?;
        Ok(self.settings.clone())
    }

    /// Saves the current settings to the JSON config file.
    fn save(&self) -> Result<(), SettingsError> {
        let path = Path::new(&self.config_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SettingsError::IoError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let json = serde_json::to_string_pretty(&self.stored).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })?;

        fs::write(path, json)
            .map_err(|e| SettingsError::IoError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn get_settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Updates an individual setting by dot-notation key path, e.g. `view.page_size`.
    ///
    /// The new value must deserialize and pass validation; the file is saved afterwards.
    /// Environment overrides stay in effect on top of the edited value.
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), SettingsError> {
        if key.is_empty() {
            return Err(SettingsError::InvalidKey("Key cannot be empty".to_string()));
        }

        let parts: Vec<&str> = key.split('.').collect();

        let mut json_value = serde_json::to_value(&self.stored).map_err(|e| {
            SettingsError::SerializationError(format!("Failed to serialize settings: {}", e))
        })?;

        {
            let mut current = &mut json_value;
            for (i, part) in parts.iter().enumerate() {
                if i == parts.len() - 1 {
                    match current {
                        serde_json::Value::Object(map) => {
                            if !map.contains_key(*part) {
                                return Err(SettingsError::InvalidKey(format!(
                                    "Key '{}' not found in settings",
                                    key
                                )));
                            }
                            map.insert(part.to_string(), value.clone());
                        }
                        _ => {
                            return Err(SettingsError::InvalidKey(format!(
                                "Cannot navigate to key '{}': intermediate value is not an object",
                                key
                            )));
                        }
                    }
                } else {
                    current = match current.get_mut(*part) {
                        Some(v) => v,
                        None => {
                            return Err(SettingsError::InvalidKey(format!(
                                "Key '{}' not found in settings",
                                key
                            )));
                        }
                    };
                }
            }
        }

        let new_settings: ClientSettings = serde_json::from_value(json_value).map_err(|e| {
            SettingsError::InvalidValue(format!("Invalid value for key '{}': {}", key, e))
        })?;

        self.install(new_settings)?;
        self.save()?;

        Ok(())
    }

    /// Applies `LINKSHELF_*` overrides. Overrides are not written back to disk.
    fn apply_env_overrides(&mut self, vars: &HashMap<String, String>) -> Result<(), SettingsError> {
        self.settings = overlay(&self.stored, vars)?;
        self.overrides = vars.clone();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), SettingsError> {
        self.install(ClientSettings::default())?;
        self.save()?;
        Ok(())
    }

    fn get_config_path(&self) -> &str {
        &self.config_path
    }
}
