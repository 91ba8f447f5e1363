use crate::error::PersistenceError;
use crate::session::Session;
use crate::snapshot::SessionSnapshot;
use std::path::Path;
use tracing::info;

/// Save a session as pretty JSON (write to temp file, then rename).
pub fn save_session(path: &Path, session: &Session) -> Result<(), PersistenceError> {
    let data = serde_json::to_string_pretty(&session.snapshot())?;
    shellchat_store::write_atomic(path, data.as_bytes()).map_err(|e| PersistenceError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(format!("{e:#}")),
    })?;
    info!(path = %path.display(), turns = session.turns().len(), "session saved");
    Ok(())
}

/// Load and validate a saved session. Returns a fresh value, so a failure
/// leaves whatever session the caller holds untouched.
pub fn load_session(path: &Path) -> Result<Session, PersistenceError> {
    let content = std::fs::read_to_string(path).map_err(|source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot: SessionSnapshot = serde_json::from_str(&content)?;
    let session = Session::restore(snapshot)?;
    info!(path = %path.display(), turns = session.turns().len(), "session loaded");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellchat_core::{extract_blocks, BlockSelector, ExecutionResult, Role};
    use std::time::Duration;

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions").join("work.json");

        let mut s = Session::new();
        let text = "```\necho hi\n```";
        let t = s.append_turn(Role::Assistant, text, extract_blocks(text));
        s.begin_batch();
        s.record_result(t, 1, ExecutionResult::exited(0, Duration::from_millis(4)))
            .unwrap();

        save_session(&path, &s).unwrap();
        let loaded = load_session(&path).unwrap();
        assert_eq!(loaded.snapshot(), s.snapshot());
        assert_eq!(
            loaded.resolve(BlockSelector::Index(1)).unwrap()[0].source_text,
            "echo hi"
        );
    }

    #[test]
    fn save_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut s = Session::new();
        save_session(&path, &s).unwrap();
        s.append_turn(Role::User, "hello", vec![]);
        save_session(&path, &s).unwrap();
        assert_eq!(load_session(&path).unwrap().turns().len(), 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_session(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[test]
    fn garbage_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_session(&path),
            Err(PersistenceError::Json(_))
        ));
    }

    #[test]
    fn inconsistent_snapshot_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        let json = r#"{
            "version": 1,
            "session_id": "ses_x",
            "created_at": "2026-01-01T00:00:00Z",
            "turns": [],
            "results": [{
                "turn_id": 4, "block_index": 1, "stdout": "", "stderr": "",
                "exit_code": 0, "interrupted": false, "duration_ms": 1
            }],
            "share_batch": []
        }"#;
        std::fs::write(&path, json).unwrap();
        assert!(matches!(
            load_session(&path),
            Err(PersistenceError::Invalid(_))
        ));
    }
}
