//! Runtime settings assembled from environment variables.
//!
//! `.env.local` and `.env` are loaded first (see [`load_dotenv`]); variables
//! already present in the process environment win over both files.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::ai::{
    DEFAULT_ANTHROPIC_MODEL, DEFAULT_GEMINI_MODEL, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_MODEL,
};

/// Errors raised while reading settings. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

/// Loads `.env.local` then `.env` from the working directory, if present.
pub fn load_dotenv() {
    for file in [".env.local", ".env"] {
        match dotenvy::from_filename(file) {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded environment file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(file, error = %e, "Failed to load environment file"),
        }
    }
}

/// Top-level settings for a labeling process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Gmail OAuth credentials.
    pub google: GoogleSettings,
    /// LLM backend selection.
    pub ai: AiSettings,
    /// Run and schedule parameters.
    pub run: RunSettings,
}

/// Gmail OAuth credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleSettings {
    pub client_id: String,
    #[serde(default, skip_serializing)]
    pub client_secret: String,
    #[serde(default, skip_serializing)]
    pub refresh_token: String,
}

/// Which LLM API classifies threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Gemini,
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmBackend::Gemini => "gemini",
            LlmBackend::OpenAi => "openai",
            LlmBackend::Anthropic => "anthropic",
            LlmBackend::Ollama => "ollama",
        }
    }

    /// Model used when `LLM_MODEL` is unset.
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmBackend::Gemini => DEFAULT_GEMINI_MODEL,
            LlmBackend::OpenAi => DEFAULT_OPENAI_MODEL,
            LlmBackend::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            LlmBackend::Ollama => DEFAULT_OLLAMA_MODEL,
        }
    }

    /// Provider-specific API key variable, if the backend needs a key.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            LlmBackend::Gemini => Some("GEMINI_API_KEY"),
            LlmBackend::OpenAi => Some("OPENAI_API_KEY"),
            LlmBackend::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmBackend::Ollama => None,
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(LlmBackend::Gemini),
            "openai" => Ok(LlmBackend::OpenAi),
            "anthropic" => Ok(LlmBackend::Anthropic),
            "ollama" => Ok(LlmBackend::Ollama),
            other => Err(format!(
                "unknown provider '{}', expected gemini, openai, anthropic or ollama",
                other
            )),
        }
    }
}

/// LLM backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    pub provider: LlmBackend,
    /// Model identifier.
    pub model: String,
    /// Custom API endpoint (self-hosted or compatible APIs).
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for AiSettings {
    fn default() -> Self {
        let provider = LlmBackend::default();
        Self {
            provider,
            model: provider.default_model().to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

/// Run and schedule parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Candidate window in days.
    pub days_lookback: u32,
    /// Minutes between scheduled runs.
    pub schedule_interval_minutes: u64,
    /// Root directory for per-run reports.
    pub report_dir: PathBuf,
    /// Timeout for every outbound HTTP request.
    pub http_timeout_secs: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            days_lookback: 14,
            schedule_interval_minutes: 10,
            report_dir: PathBuf::from("logs/runs"),
            http_timeout_secs: 60,
        }
    }
}

impl RunSettings {
    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_minutes * 60)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`. Empty values count as unset.
    ///
    /// Every missing variable is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut missing = Vec::new();
        let mut require = |key: &str| {
            get(key).unwrap_or_else(|| {
                missing.push(key.to_string());
                String::new()
            })
        };

        let google = GoogleSettings {
            client_id: require("GOOGLE_CLIENT_ID"),
            client_secret: require("GOOGLE_CLIENT_SECRET"),
            refresh_token: require("GOOGLE_REFRESH_TOKEN"),
        };

        let provider = match get("LLM_PROVIDER") {
            Some(value) => {
                value
                    .parse::<LlmBackend>()
                    .map_err(|reason| ConfigError::Invalid {
                        var: "LLM_PROVIDER".to_string(),
                        value,
                        reason,
                    })?
            }
            None => LlmBackend::default(),
        };

        let api_key = get("LLM_API_KEY")
            .or_else(|| provider.api_key_var().and_then(|var| get(var)));
        if api_key.is_none() {
            if let Some(var) = provider.api_key_var() {
                missing.push(format!("{} (or LLM_API_KEY)", var));
            }
        }

        let ai = AiSettings {
            provider,
            model: get("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            base_url: get("LLM_BASE_URL"),
            api_key,
        };

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let defaults = RunSettings::default();
        let run = RunSettings {
            days_lookback: parse_or(&get, "DAYS_LOOKBACK", defaults.days_lookback)?,
            schedule_interval_minutes: parse_or(
                &get,
                "SCHEDULE_INTERVAL_MINUTES",
                defaults.schedule_interval_minutes,
            )?,
            report_dir: get("REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.report_dir),
            http_timeout_secs: parse_or(&get, "HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
        };

        Ok(Self { google, ai, run })
    }
}

/// Parses a positive integer variable, falling back to `default` when unset.
fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(key) else {
        return Ok(default);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed == T::default() => Err(ConfigError::Invalid {
            var: key.to_string(),
            value,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Invalid {
            var: key.to_string(),
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const GOOGLE: [(&str, &str); 3] = [
        ("GOOGLE_CLIENT_ID", "id"),
        ("GOOGLE_CLIENT_SECRET", "secret"),
        ("GOOGLE_REFRESH_TOKEN", "refresh"),
    ];

    #[test]
    fn defaults_with_gemini_key() {
        let mut vars = GOOGLE.to_vec();
        vars.push(("GEMINI_API_KEY", "g-key"));

        let settings = Settings::from_lookup(env(&vars)).unwrap();
        assert_eq!(settings.ai.provider, LlmBackend::Gemini);
        assert_eq!(settings.ai.model, "gemini-2.0-flash");
        assert_eq!(settings.ai.api_key.as_deref(), Some("g-key"));
        assert_eq!(settings.run.days_lookback, 14);
        assert_eq!(settings.run.schedule_interval(), Duration::from_secs(600));
        assert_eq!(settings.run.report_dir, PathBuf::from("logs/runs"));
        assert_eq!(settings.run.http_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn reports_every_missing_variable() {
        let err = Settings::from_lookup(env(&[("GOOGLE_CLIENT_ID", "id")])).unwrap_err();
        match err {
            ConfigError::Missing(vars) => assert_eq!(
                vars,
                vec![
                    "GOOGLE_CLIENT_SECRET".to_string(),
                    "GOOGLE_REFRESH_TOKEN".to_string(),
                    "GEMINI_API_KEY (or LLM_API_KEY)".to_string(),
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_values_count_as_missing() {
        let mut vars = GOOGLE.to_vec();
        vars[0] = ("GOOGLE_CLIENT_ID", "  ");
        vars.push(("LLM_API_KEY", "k"));
        assert!(matches!(
            Settings::from_lookup(env(&vars)),
            Err(ConfigError::Missing(v)) if v == vec!["GOOGLE_CLIENT_ID".to_string()]
        ));
    }

    #[test]
    fn ollama_needs_no_key() {
        let mut vars = GOOGLE.to_vec();
        vars.push(("LLM_PROVIDER", "Ollama"));
        vars.push(("LLM_BASE_URL", "http://gpu-box:11434/v1"));

        let settings = Settings::from_lookup(env(&vars)).unwrap();
        assert_eq!(settings.ai.provider, LlmBackend::Ollama);
        assert_eq!(settings.ai.model, "llama3.1");
        assert!(settings.ai.api_key.is_none());
        assert_eq!(
            settings.ai.base_url.as_deref(),
            Some("http://gpu-box:11434/v1")
        );
    }

    #[test]
    fn generic_key_overrides_provider_key() {
        let mut vars = GOOGLE.to_vec();
        vars.push(("LLM_PROVIDER", "anthropic"));
        vars.push(("LLM_API_KEY", "generic"));
        vars.push(("ANTHROPIC_API_KEY", "specific"));
        vars.push(("LLM_MODEL", "claude-3-5-sonnet-latest"));

        let settings = Settings::from_lookup(env(&vars)).unwrap();
        assert_eq!(settings.ai.api_key.as_deref(), Some("generic"));
        assert_eq!(settings.ai.model, "claude-3-5-sonnet-latest");
    }

    #[test]
    fn invalid_provider_and_numbers() {
        let mut vars = GOOGLE.to_vec();
        vars.push(("LLM_PROVIDER", "mistral"));
        assert!(matches!(
            Settings::from_lookup(env(&vars)),
            Err(ConfigError::Invalid { var, .. }) if var == "LLM_PROVIDER"
        ));

        let mut vars = GOOGLE.to_vec();
        vars.push(("LLM_API_KEY", "k"));
        vars.push(("DAYS_LOOKBACK", "two weeks"));
        assert!(matches!(
            Settings::from_lookup(env(&vars)),
            Err(ConfigError::Invalid { var, .. }) if var == "DAYS_LOOKBACK"
        ));

        let mut vars = GOOGLE.to_vec();
        vars.push(("LLM_API_KEY", "k"));
        vars.push(("SCHEDULE_INTERVAL_MINUTES", "0"));
        assert!(matches!(
            Settings::from_lookup(env(&vars)),
            Err(ConfigError::Invalid { var, .. }) if var == "SCHEDULE_INTERVAL_MINUTES"
        ));
    }

    #[test]
    fn secrets_are_not_serialized() {
        let mut vars = GOOGLE.to_vec();
        vars.push(("LLM_API_KEY", "top-secret"));
        let settings = Settings::from_lookup(env(&vars)).unwrap();

        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("top-secret"));
        assert!(!json.contains("refresh"));
        assert!(json.contains("\"provider\":\"gemini\""));
    }

    #[test]
    fn backend_serialization() {
        let json = serde_json::to_string(&LlmBackend::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        assert_eq!("openai".parse::<LlmBackend>().unwrap(), LlmBackend::OpenAi);
    }
}
