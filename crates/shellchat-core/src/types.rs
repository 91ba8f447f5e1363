use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Turn sequence number, unique within a session. Assigned from 1.
pub type TurnId = u64;

/// Placeholder carried by freshly extracted blocks until their turn is appended.
pub const UNASSIGNED_TURN: TurnId = 0;

/// Exit code reported for a command that was stopped by the user or a timeout.
pub const INTERRUPTED_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One fenced excerpt of shell text found in an assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandBlock {
    /// 1-based position among the non-empty blocks of its reply.
    pub index: usize,
    pub source_text: String,
    /// Fence info string (`bash`, `sh`, ...), informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Stamped when the owning turn is appended; implied by the turn on disk.
    #[serde(skip)]
    pub origin_turn_id: TurnId,
}

impl CommandBlock {
    pub fn new(index: usize, source_text: impl Into<String>, lang: Option<String>) -> Self {
        Self {
            index,
            source_text: source_text.into(),
            lang,
            origin_turn_id: UNASSIGNED_TURN,
        }
    }

    /// First line of the block, for one-line listings.
    pub fn headline(&self) -> &str {
        self.source_text.lines().next().unwrap_or("")
    }
}

/// One exchange unit in the conversation. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub text: String,
    pub timestamp: String,
    #[serde(default)]
    pub blocks: Vec<CommandBlock>,
}

/// Key of a recorded execution: which block of which turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResultKey {
    pub turn_id: TurnId,
    pub block_index: usize,
}

impl ResultKey {
    pub fn new(turn_id: TurnId, block_index: usize) -> Self {
        Self {
            turn_id,
            block_index,
        }
    }
}

/// How a selector names the block(s) to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSelector {
    /// Block n of the current block set.
    Index(usize),
    /// Every block of the current block set, in order.
    All,
    /// An explicit block of any turn.
    At { turn_id: TurnId, index: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    User,
    Timeout,
}

/// Outcome of running one command block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
    pub exit_code: i32,
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_reason: Option<InterruptReason>,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
}

impl ExecutionResult {
    /// Result of a child that exited on its own.
    pub fn exited(exit_code: i32, duration: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            exit_code,
            interrupted: false,
            interrupt_reason: None,
            duration: whole_millis(duration),
        }
    }

    /// Result of a child ended by the interrupt path.
    pub fn interrupted(reason: InterruptReason, duration: Duration) -> Self {
        Self {
            exit_code: INTERRUPTED_EXIT_CODE,
            interrupted: true,
            interrupt_reason: Some(reason),
            ..Self::exited(INTERRUPTED_EXIT_CODE, duration)
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.interrupted && self.exit_code == 0
    }

    pub fn truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }

    /// Short status, e.g. `exit 0` or `interrupted (timeout)`.
    pub fn status_label(&self) -> String {
        match (self.interrupted, self.interrupt_reason) {
            (true, Some(InterruptReason::User)) => "interrupted by user".to_string(),
            (true, Some(InterruptReason::Timeout)) => "interrupted (timeout)".to_string(),
            (true, None) => "interrupted".to_string(),
            (false, _) => format!("exit {}", self.exit_code),
        }
    }
}

/// Durations are stored with millisecond precision so saved sessions compare equal.
fn whole_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

pub fn now_rfc3339() -> String {
    let now = time::OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc3339)
        .expect("RFC3339 formatting should not fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_result_uses_sentinel() {
        let r = ExecutionResult::interrupted(InterruptReason::Timeout, Duration::from_secs(1));
        assert!(r.interrupted);
        assert_eq!(r.exit_code, INTERRUPTED_EXIT_CODE);
        assert!(!r.succeeded());
        assert_eq!(r.status_label(), "interrupted (timeout)");
    }

    #[test]
    fn duration_truncated_to_millis() {
        let r = ExecutionResult::exited(0, Duration::from_micros(1_500_700));
        assert_eq!(r.duration, Duration::from_millis(1500));
    }

    #[test]
    fn result_json_uses_duration_ms() {
        let r = ExecutionResult::exited(3, Duration::from_millis(42));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["duration_ms"], 42);
        assert_eq!(json["exit_code"], 3);
        assert!(json.get("interrupt_reason").is_none());
        let back: ExecutionResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn block_origin_not_serialized() {
        let mut b = CommandBlock::new(1, "ls -la", Some("bash".into()));
        b.origin_turn_id = 7;
        let json = serde_json::to_value(&b).unwrap();
        assert!(json.get("origin_turn_id").is_none());
        let back: CommandBlock = serde_json::from_value(json).unwrap();
        assert_eq!(back.origin_turn_id, UNASSIGNED_TURN);
        assert_eq!(back.lang.as_deref(), Some("bash"));
    }

    #[test]
    fn result_keys_order_by_turn_then_index() {
        let mut keys = vec![
            ResultKey::new(2, 1),
            ResultKey::new(1, 3),
            ResultKey::new(1, 1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ResultKey::new(1, 1),
                ResultKey::new(1, 3),
                ResultKey::new(2, 1)
            ]
        );
    }
}
