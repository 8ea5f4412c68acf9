use std::collections::HashMap;
use std::path::{Path, PathBuf};

use deskpull_client::OAuthCredentials;
use deskpull_client::token::DEFAULT_ACCOUNTS_URL;
use deskpull_core::AppError;
use serde::Deserialize;

pub const ENV_FILE: &str = ".env";
pub const SETTINGS_FILE: &str = "zoho-desk.json";
pub const TOKEN_CACHE_FILE: &str = ".zoho-desk-token-cache.json";
pub const DEFAULT_BASE_URL: &str = "https://desk.zoho.com/api/v1";

const REQUIRED_KEYS: [&str; 4] = [
    "ZOHO_CLIENT_ID",
    "ZOHO_CLIENT_SECRET",
    "ZOHO_DESK_REFRESH_TOKEN",
    "ZOHO_DESK_ORG_ID",
];

/// `~/.config/e2e/agent-profiles`, if a home directory can be found.
pub fn default_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| {
        dirs.home_dir()
            .join(".config")
            .join("e2e")
            .join("agent-profiles")
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Settings {
    base_url: Option<String>,
    accounts_url: Option<String>,
    department_id: Option<String>,
}

/// Everything needed to talk to the desk API.
#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub credentials: OAuthCredentials,
    pub org_id: String,
    pub base_url: String,
    pub accounts_url: String,
    pub department_id: Option<String>,
    pub token_cache: PathBuf,
}

impl DeskConfig {
    /// Read secrets from `<dir>/.env` and settings from
    /// `<dir>/zoho-desk.json`.
    ///
    /// Errors say which file to create or which keys are missing.
    pub fn load(dir: &Path) -> Result<Self, AppError> {
        let env_path = dir.join(ENV_FILE);
        if !env_path.exists() {
            return Err(AppError::ConfigError(format!(
                "{} not found. Create it with {}",
                env_path.display(),
                REQUIRED_KEYS.join(", ")
            )));
        }
        let env = read_env(&env_path)?;

        let settings_path = dir.join(SETTINGS_FILE);
        if !settings_path.exists() {
            return Err(AppError::ConfigError(format!(
                "{} not found. Create it with: {{ \"baseUrl\": \"{DEFAULT_BASE_URL}\", \"departmentId\": \"\" }}",
                settings_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&settings_path)?;
        let settings: Settings = serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("Invalid JSON in {}: {e}", settings_path.display()))
        })?;

        let missing: Vec<&str> = REQUIRED_KEYS
            .into_iter()
            .filter(|key| env.get(*key).is_none_or(|v| v.is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::ConfigError(format!(
                "Missing env vars in {}: {}",
                env_path.display(),
                missing.join(", ")
            )));
        }

        let value = |key: &str| env.get(key).cloned().unwrap_or_default();
        Ok(Self {
            credentials: OAuthCredentials {
                client_id: value("ZOHO_CLIENT_ID"),
                client_secret: value("ZOHO_CLIENT_SECRET"),
                refresh_token: value("ZOHO_DESK_REFRESH_TOKEN"),
            },
            org_id: value("ZOHO_DESK_ORG_ID"),
            base_url: non_empty(settings.base_url).unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            accounts_url: non_empty(settings.accounts_url)
                .unwrap_or_else(|| DEFAULT_ACCOUNTS_URL.into()),
            department_id: non_empty(settings.department_id),
            token_cache: dir.join(TOKEN_CACHE_FILE),
        })
    }
}

/// Parse a dotenv file without touching the process environment.
fn read_env(path: &Path) -> Result<HashMap<String, String>, AppError> {
    let unreadable = |e: dotenvy::Error| {
        AppError::ConfigError(format!("Could not read {}: {e}", path.display()))
    };
    dotenvy::from_path_iter(path)
        .map_err(unreadable)?
        .map(|entry| entry.map_err(unreadable))
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
