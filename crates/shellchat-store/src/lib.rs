use fs2::FileExt;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Environment variable that relocates the whole store (tests, portable installs).
pub const STORE_DIR_ENV: &str = "SHELLCHAT_HOME";

/// Return the per-user store root.
/// `$SHELLCHAT_HOME` if set, else `<data_dir>/shellchat`, else `~/.shellchat`.
pub fn store_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(STORE_DIR_ENV).filter(|v| !v.is_empty()) {
        PathBuf::from(dir)
    } else if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("shellchat")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".shellchat")
    } else {
        PathBuf::from(".shellchat")
    }
}

/// All well-known paths under the store root.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub root: PathBuf,
    pub config_json: PathBuf,
    pub command_history: PathBuf,
    pub sessions_dir: PathBuf,
    pub lock_file: PathBuf,
}

impl StorePaths {
    /// Derive all paths from a store root. Pure computation, no I/O.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_json: root.join("config.json"),
            command_history: root.join("command_history"),
            sessions_dir: root.join("sessions"),
            lock_file: root.join("LOCK"),
            root,
        }
    }

    pub fn discover() -> Self {
        Self::at(store_root())
    }

    /// Create the store directories. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.sessions_dir)?;
        Ok(())
    }

    /// Location of a saved session named by the user. A bare file name lives
    /// in `sessions/`; anything with a directory part is used as given.
    pub fn session_file(&self, name: &Path) -> PathBuf {
        let mut parts = name.components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(_)), None) => self.sessions_dir.join(name),
            _ => name.to_path_buf(),
        }
    }
}

/// Atomic write: write to temp file in same dir, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => anyhow::bail!("no parent dir for {}", path.display()),
    };
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// File-based exclusive lock guard.
pub struct LockGuard {
    _file: fs::File,
}

/// Acquire an exclusive file lock. Creates the lock file if needed.
pub fn lock_file(path: &Path) -> anyhow::Result<LockGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(LockGuard { _file: file })
}
