use crate::config::{AppConfig, KEYS};
use clap::Subcommand;
use shellchat_store::StorePaths;
use std::path::Path;

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Set a config value
    Set {
        /// Config key (e.g. shell_path, command_timeout_secs)
        key: String,
        /// Config value (true/false/number/string, `null` to clear)
        value: String,
    },
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },
    /// List all config values, including defaults
    List,
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd, paths: &StorePaths) -> anyhow::Result<()> {
    match cmd {
        ConfigCmd::Set { key, value } => set(paths, &key, &value),
        ConfigCmd::Get { key } => get(paths, &key),
        ConfigCmd::List => list(paths),
    }
}

// ── Command Implementations ──

/// Read the raw config object. Returns an empty map if the file doesn't exist.
fn read_config(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    if !path.exists() {
        return Ok(serde_json::Map::new());
    }
    let content = std::fs::read_to_string(path)?;
    let val: serde_json::Value = serde_json::from_str(&content)?;
    match val {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

fn write_config(
    path: &Path,
    config: &serde_json::Map<String, serde_json::Value>,
) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&config)?;
    shellchat_store::write_atomic(path, json.as_bytes())
}

/// Parse a string value into an appropriate JSON value (null/bool/number/string).
fn parse_value(s: &str) -> serde_json::Value {
    match s {
        "null" => serde_json::Value::Null,
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        _ => {
            if let Ok(n) = s.parse::<i64>() {
                serde_json::Value::Number(n.into())
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::json!(f)
            } else {
                serde_json::Value::String(s.to_string())
            }
        }
    }
}

fn check_key(key: &str) -> anyhow::Result<()> {
    if !KEYS.contains(&key) {
        anyhow::bail!("unknown config key \"{key}\" (known: {})", KEYS.join(", "));
    }
    Ok(())
}

/// Effective settings: defaults overlaid with the file.
fn effective(paths: &StorePaths) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let config = AppConfig::load(&paths.config_json)?;
    match serde_json::to_value(config)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

/// `shellchat config set <key> <value>`
pub fn set(paths: &StorePaths, key: &str, value: &str) -> anyhow::Result<()> {
    check_key(key)?;
    let mut config = read_config(&paths.config_json)?;
    config.insert(key.to_string(), parse_value(value));
    // Reject values the loader would fail on.
    serde_json::from_value::<AppConfig>(serde_json::Value::Object(config.clone()))
        .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))?;
    write_config(&paths.config_json, &config)?;
    println!("{key} = {value}");
    Ok(())
}

/// `shellchat config get <key>`
pub fn get(paths: &StorePaths, key: &str) -> anyhow::Result<()> {
    check_key(key)?;
    let config = effective(paths)?;
    match config.get(key) {
        Some(serde_json::Value::Null) | None => println!("(not set)"),
        Some(val) => println!("{val}"),
    }
    Ok(())
}

/// `shellchat config list`
pub fn list(paths: &StorePaths) -> anyhow::Result<()> {
    let explicit = read_config(&paths.config_json)?;
    for (k, v) in &effective(paths)? {
        let origin = if explicit.contains_key(k) { "" } else { "  (default)" };
        println!("{k} = {v}{origin}");
    }
    Ok(())
}
