use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/backend.json";

const URL_ENV: &str = "SUPABASE_URL";
const ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub anon_key: Option<String>,
}

/// Credentials for the hosted backend. Absence of either value means demo
/// mode: every component skips network I/O entirely.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
}

impl AppConfig {
    /// Resolve the backend credentials, environment taking precedence over
    /// the config file. `None` switches the whole app into demo mode.
    pub fn backend(&self) -> Option<BackendConfig> {
        let url = std::env::var(URL_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| self.backend_url.clone());
        let anon_key = std::env::var(ANON_KEY_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| self.anon_key.clone());
        resolve_backend(url, anon_key)
    }
}

fn resolve_backend(url: Option<String>, anon_key: Option<String>) -> Option<BackendConfig> {
    match (url, anon_key) {
        (Some(url), Some(anon_key)) if !url.is_empty() && !anon_key.is_empty() => {
            Some(BackendConfig {
                url: url.trim_end_matches('/').to_string(),
                anon_key,
            })
        }
        _ => None,
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_mean_demo_mode() {
        assert!(resolve_backend(None, None).is_none());
        assert!(resolve_backend(Some("https://x.supabase.co".into()), None).is_none());
        assert!(resolve_backend(None, Some("key".into())).is_none());
        assert!(resolve_backend(Some(String::new()), Some("key".into())).is_none());
    }

    #[test]
    fn trailing_slash_is_trimmed_from_url() {
        let backend =
            resolve_backend(Some("https://x.supabase.co/".into()), Some("key".into())).unwrap();
        assert_eq!(backend.url, "https://x.supabase.co");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config("config/does-not-exist.json");
        assert!(config.backend_url.is_none());
        assert!(config.anon_key.is_none());
    }
}
