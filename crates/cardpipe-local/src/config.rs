//! Runtime configuration.
//!
//! Precedence per key: `CARDPIPE_*` environment variable, then the JSON settings file
//! (`{"apiKey": ..., "model": ...}`), then built-in defaults.

use crate::automation::{AutomationConfig, RetryPolicy};
use crate::render_playwright::PlaywrightConfig;
use cardpipe_core::{Error, PageTimeouts, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn";
pub const DEFAULT_MODEL: &str = "Qwen/Qwen2.5-7B-Instruct";
pub const DEFAULT_MODEL_NAMESPACE: &str = "Qwen";
pub const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 120_000;

/// Credential/config document shared with other front-ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Settings {
    /// Missing file → empty settings. A file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::NotConfigured(format!(
                    "read settings {}: {e}",
                    path.display()
                )))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&raw).map_err(|e| {
            Error::NotConfigured(format!("settings file {} is not valid: {e}", path.display()))
        })
    }
}

/// Namespaced model id: `Qwen2.5-7B-Instruct` → `Qwen/Qwen2.5-7B-Instruct`.
pub fn normalize_model_id(model: &str) -> String {
    let m = model.trim();
    if m.is_empty() {
        DEFAULT_MODEL.to_string()
    } else if m.contains('/') {
        m.to_string()
    } else {
        format!("{DEFAULT_MODEL_NAMESPACE}/{m}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_COMPLETION_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub completion: CompletionConfig,
    pub playwright: PlaywrightConfig,
    pub automation: AutomationConfig,
    pub store_dir: PathBuf,
    pub settings_path: Option<PathBuf>,
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cardpipe").join("config.json"))
}

fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("cardpipe").join("cards"))
        .unwrap_or_else(|| PathBuf::from(".cardpipe").join("cards"))
}

fn parse_u64(key: &str, v: &str) -> Result<u64> {
    v.parse::<u64>().map_err(|_| {
        Error::NotConfigured(format!("{key} must be a non-negative integer, got {v:?}"))
    })
}

impl AppConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup (values are trimmed; empty means unset).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| {
            lookup(k)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let get_u64 = |k: &str| get(k).map(|v| parse_u64(k, &v)).transpose();

        let settings_path = get("CARDPIPE_CONFIG_FILE")
            .map(PathBuf::from)
            .or_else(default_settings_path);
        let settings = match &settings_path {
            Some(p) => Settings::load(p)?,
            None => Settings::default(),
        };

        let completion = CompletionConfig {
            base_url: get("CARDPIPE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: get("CARDPIPE_API_KEY").or_else(|| {
                settings
                    .api_key
                    .clone()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
            }),
            model: normalize_model_id(
                &get("CARDPIPE_MODEL")
                    .or_else(|| settings.model.clone())
                    .unwrap_or_default(),
            ),
            timeout_ms: get_u64("CARDPIPE_COMPLETION_TIMEOUT_MS")?
                .unwrap_or(DEFAULT_COMPLETION_TIMEOUT_MS),
        };

        let pw_default = PlaywrightConfig::default();
        let playwright = PlaywrightConfig {
            cdp_endpoint: get("CARDPIPE_CDP_ENDPOINT").unwrap_or(pw_default.cdp_endpoint),
            node_bin: get("CARDPIPE_NODE").unwrap_or(pw_default.node_bin),
            node_path: get("CARDPIPE_NODE_PATH"),
            ..pw_default
        };

        let t = PageTimeouts::default();
        let r = RetryPolicy::default();
        let a = AutomationConfig::default();
        let automation = AutomationConfig {
            timeouts: PageTimeouts {
                navigation_ms: get_u64("CARDPIPE_NAV_TIMEOUT_MS")?.unwrap_or(t.navigation_ms),
                selector_ms: get_u64("CARDPIPE_SELECTOR_TIMEOUT_MS")?.unwrap_or(t.selector_ms),
                settle_ms: get_u64("CARDPIPE_SETTLE_MS")?.unwrap_or(t.settle_ms),
            },
            retry: RetryPolicy {
                max_attempts: match get_u64("CARDPIPE_RETRY_MAX_ATTEMPTS")? {
                    Some(n) => u32::try_from(n.max(1)).unwrap_or(u32::MAX),
                    None => r.max_attempts,
                },
                delay: get_u64("CARDPIPE_RETRY_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(r.delay),
            },
            search_url_template: get("CARDPIPE_SEARCH_URL").unwrap_or(a.search_url_template),
        };

        Ok(Self {
            completion,
            playwright,
            automation,
            store_dir: get("CARDPIPE_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_store_dir),
            settings_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn model_ids_are_namespaced() {
        assert_eq!(normalize_model_id("Qwen2.5-7B-Instruct"), "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(normalize_model_id("deepseek-ai/DeepSeek-V3"), "deepseek-ai/DeepSeek-V3");
        assert_eq!(normalize_model_id("  "), DEFAULT_MODEL);
    }

    #[test]
    fn defaults_apply_without_env_or_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("absent.json");
        let cfg = AppConfig::from_lookup(lookup(&[(
            "CARDPIPE_CONFIG_FILE",
            missing.to_str().unwrap(),
        )]))
        .unwrap();
        assert_eq!(cfg.completion.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.completion.model, DEFAULT_MODEL);
        assert_eq!(cfg.completion.api_key, None);
        assert_eq!(cfg.playwright.cdp_endpoint, "http://localhost:9222");
        assert_eq!(cfg.automation.retry.max_attempts, 3);
        assert_eq!(cfg.automation.timeouts.navigation_ms, 30_000);
    }

    #[test]
    fn env_overrides_settings_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"apiKey":"from-file","model":"Qwen2.5-72B-Instruct"}"#).unwrap();

        let cfg = AppConfig::from_lookup(lookup(&[("CARDPIPE_CONFIG_FILE", path.to_str().unwrap())]))
            .unwrap();
        assert_eq!(cfg.completion.api_key.as_deref(), Some("from-file"));
        assert_eq!(cfg.completion.model, "Qwen/Qwen2.5-72B-Instruct");

        let cfg = AppConfig::from_lookup(lookup(&[
            ("CARDPIPE_CONFIG_FILE", path.to_str().unwrap()),
            ("CARDPIPE_API_KEY", " from-env "),
            ("CARDPIPE_RETRY_MAX_ATTEMPTS", "0"),
            ("CARDPIPE_RETRY_DELAY_MS", "5"),
        ]))
        .unwrap();
        assert_eq!(cfg.completion.api_key.as_deref(), Some("from-env"));
        assert_eq!(cfg.automation.retry.max_attempts, 1);
        assert_eq!(cfg.automation.retry.delay, Duration::from_millis(5));
    }

    #[test]
    fn bad_numbers_and_bad_settings_are_not_configured() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        let err = AppConfig::from_lookup(lookup(&[
            ("CARDPIPE_CONFIG_FILE", path.to_str().unwrap()),
            ("CARDPIPE_NAV_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(ref m) if m.contains("CARDPIPE_NAV_TIMEOUT_MS")));

        std::fs::write(&path, "{not json").unwrap();
        let err = AppConfig::from_lookup(lookup(&[("CARDPIPE_CONFIG_FILE", path.to_str().unwrap())]))
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }
}
