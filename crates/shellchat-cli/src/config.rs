use anyhow::Context;
use serde::{Deserialize, Serialize};
use shellchat_runner::RunConfig;
use shellchat_transport::anthropic::{
    API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
    DEFAULT_TIMEOUT,
};
use shellchat_transport::usage::DEFAULT_COST_PER_MILLION;
use shellchat_transport::TransportConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FALLBACK_SHELL: &str = "/bin/bash";

/// Settings read once at startup from `<store>/config.json`. Missing keys
/// take their defaults; the API key only ever comes from the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Interpreter for command blocks; `$SHELL` when unset.
    pub shell_path: Option<PathBuf>,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub history_window: usize,
    /// Per-block limit; none when unset.
    pub command_timeout_secs: Option<u64>,
    pub grace_period_ms: u64,
    pub output_cap_bytes: usize,
    pub strip_secrets: bool,
    pub redact_shared_output: bool,
    pub cost_per_million: f64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let run = RunConfig::default();
        Self {
            shell_path: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            history_window: DEFAULT_HISTORY_WINDOW,
            command_timeout_secs: None,
            grace_period_ms: run.grace_period.as_millis() as u64,
            output_cap_bytes: run.output_cap,
            strip_secrets: run.strip_secrets,
            redact_shared_output: true,
            cost_per_million: DEFAULT_COST_PER_MILLION,
            api_key: None,
        }
    }
}

/// Keys accepted by `shellchat config set`.
pub const KEYS: &[&str] = &[
    "shell_path",
    "model",
    "max_tokens",
    "base_url",
    "request_timeout_secs",
    "history_window",
    "command_timeout_secs",
    "grace_period_ms",
    "output_cap_bytes",
    "strip_secrets",
    "redact_shared_output",
    "cost_per_million",
];

impl AppConfig {
    /// Load from `path` (defaults if the file is missing) plus the environment.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing config: {}", path.display()))?
        } else {
            Self::default()
        };
        config.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        Ok(config)
    }

    /// Configured shell, else `$SHELL`, else `/bin/bash`.
    pub fn resolved_shell(&self) -> PathBuf {
        self.shell_path
            .clone()
            .or_else(|| {
                std::env::var_os("SHELL")
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(|| PathBuf::from(FALLBACK_SHELL))
    }

    pub fn run_config(&self) -> RunConfig {
        let mut run = RunConfig::default()
            .with_shell(self.resolved_shell())
            .with_timeout(self.command_timeout_secs.map(Duration::from_secs))
            .with_grace_period(Duration::from_millis(self.grace_period_ms))
            .with_echo(true);
        run.strip_secrets = self.strip_secrets;
        run.output_cap = self.output_cap_bytes;
        run
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.request_timeout_secs),
            history_window: self.history_window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.history_window, 10);
        assert!(cfg.redact_shared_output);
        assert!(cfg.run_config().timeout.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"shell_path": "/bin/zsh", "command_timeout_secs": 5, "max_tokens": 2048}"#,
        )
        .unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.resolved_shell(), PathBuf::from("/bin/zsh"));
        assert_eq!(cfg.max_tokens, 2048);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        let run = cfg.run_config();
        assert_eq!(run.timeout, Some(Duration::from_secs(5)));
        assert!(run.strip_secrets);
        assert!(run.echo);
        assert_eq!(cfg.transport_config().max_tokens, 2048);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_tokens": "lots"}"#).unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing config"));
    }

    #[test]
    fn api_key_is_never_serialized() {
        let cfg = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn keys_cover_every_field() {
        let json = serde_json::to_value(AppConfig::default()).unwrap();
        let fields: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        for field in &fields {
            assert!(KEYS.contains(field), "{field} missing from KEYS");
        }
        assert_eq!(fields.len(), KEYS.len());
    }
}
