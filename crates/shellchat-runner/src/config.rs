use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// How long a signalled command gets to exit before the group is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Per-stream capture limit.
pub const DEFAULT_OUTPUT_CAP: usize = 1024 * 1024;

/// Credential-bearing variables removed from the child when `strip_secrets` is on.
pub const DEFAULT_SECRET_VARS: &[&str] = &["ANTHROPIC_API_KEY"];

/// Everything the runner needs besides the command text.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Interpreter the script file is handed to.
    pub shell_path: PathBuf,
    pub working_directory: Option<PathBuf>,
    /// `Some(v)` sets the variable, `None` removes it. Applied after secret stripping.
    pub env_overrides: BTreeMap<String, Option<String>>,
    pub timeout: Option<Duration>,
    pub strip_secrets: bool,
    pub secret_vars: Vec<String>,
    pub grace_period: Duration,
    pub output_cap: usize,
    /// Directory for the temporary script (system temp dir when unset).
    pub script_dir: Option<PathBuf>,
    /// Tee output to this process's stdout/stderr while capturing.
    pub echo: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            shell_path: PathBuf::from("bash"),
            working_directory: None,
            env_overrides: BTreeMap::new(),
            timeout: None,
            strip_secrets: true,
            secret_vars: DEFAULT_SECRET_VARS.iter().map(|s| s.to_string()).collect(),
            grace_period: DEFAULT_GRACE_PERIOD,
            output_cap: DEFAULT_OUTPUT_CAP,
            script_dir: None,
            echo: false,
        }
    }
}

impl RunConfig {
    pub fn with_shell(mut self, shell_path: impl Into<PathBuf>) -> Self {
        self.shell_path = shell_path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn set_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), Some(value.into()));
        self
    }

    pub fn unset_env(mut self, key: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), None);
        self
    }
}
