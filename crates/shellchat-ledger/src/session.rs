use shellchat_core::{
    now_rfc3339, BlockSelector, CommandBlock, ExecutionResult, ResultKey, Role, Turn, TurnId,
    UnknownBlockError,
};
use std::collections::BTreeMap;
use tracing::debug;

/// In-memory conversation state: turns, the blocks they carry, and the
/// recorded result of every block that has been run.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) session_id: String,
    pub(crate) created_at: String,
    pub(crate) turns: Vec<Turn>,
    pub(crate) results: BTreeMap<ResultKey, ExecutionResult>,
    pub(crate) last_shared: Option<ResultKey>,
    pub(crate) share_batch: Vec<ResultKey>,
    /// Assistant turn whose blocks "block n" refers to.
    pub(crate) current_set: Option<TurnId>,
    pub(crate) next_turn_id: TurnId,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: format!("ses_{}", ulid::Ulid::new().to_string().to_lowercase()),
            created_at: now_rfc3339(),
            turns: Vec::new(),
            results: BTreeMap::new(),
            last_shared: None,
            share_batch: Vec::new(),
            current_set: None,
            next_turn_id: 1,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn(&self, id: TurnId) -> Option<&Turn> {
        self.turns
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| &self.turns[i])
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turn id of the current block set, if any.
    pub fn current_set(&self) -> Option<TurnId> {
        self.current_set
    }

    /// Blocks of the current block set (empty when there is none).
    pub fn current_blocks(&self) -> &[CommandBlock] {
        self.current_set
            .and_then(|id| self.turn(id))
            .map(|t| t.blocks.as_slice())
            .unwrap_or(&[])
    }

    /// Append a turn with the next id. Blocks are renumbered 1..=n and
    /// stamped with the new id.
    pub fn append_turn(
        &mut self,
        role: Role,
        text: impl Into<String>,
        blocks: Vec<CommandBlock>,
    ) -> TurnId {
        let id = self.next_turn_id;
        self.next_turn_id += 1;
        let blocks: Vec<CommandBlock> = blocks
            .into_iter()
            .enumerate()
            .map(|(i, mut b)| {
                b.index = i + 1;
                b.origin_turn_id = id;
                b
            })
            .collect();
        let turn = Turn {
            id,
            role,
            text: text.into(),
            timestamp: now_rfc3339(),
            blocks,
        };
        self.track_block_set(&turn);
        debug!(turn_id = id, role = role.as_str(), blocks = turn.blocks.len(), "turn appended");
        self.turns.push(turn);
        id
    }

    /// An assistant turn replaces the current block set, even with zero blocks.
    pub(crate) fn track_block_set(&mut self, turn: &Turn) {
        if turn.role == Role::Assistant {
            self.current_set = (!turn.blocks.is_empty()).then_some(turn.id);
        }
    }

    pub fn resolve(&self, selector: BlockSelector) -> Result<Vec<CommandBlock>, UnknownBlockError> {
        match selector {
            BlockSelector::Index(n) => {
                let blocks = self.current_set_blocks()?;
                if n == 0 || n > blocks.len() {
                    return Err(UnknownBlockError::OutOfRange {
                        index: n,
                        available: blocks.len(),
                    });
                }
                Ok(vec![blocks[n - 1].clone()])
            }
            BlockSelector::All => Ok(self.current_set_blocks()?.to_vec()),
            BlockSelector::At { turn_id, index } => self
                .block(turn_id, index)
                .cloned()
                .map(|b| vec![b])
                .ok_or(UnknownBlockError::NotFound { turn_id, index }),
        }
    }

    fn current_set_blocks(&self) -> Result<&[CommandBlock], UnknownBlockError> {
        match self.current_blocks() {
            [] => Err(UnknownBlockError::NoBlockSet),
            blocks => Ok(blocks),
        }
    }

    pub fn block(&self, turn_id: TurnId, index: usize) -> Option<&CommandBlock> {
        let turn = self.turn(turn_id)?;
        index.checked_sub(1).and_then(|i| turn.blocks.get(i))
    }

    /// Start a new share batch. Called once per run request.
    pub fn begin_batch(&mut self) {
        self.share_batch.clear();
    }

    /// Store the result for a block, replacing any earlier run of it.
    pub fn record_result(
        &mut self,
        turn_id: TurnId,
        block_index: usize,
        result: ExecutionResult,
    ) -> Result<(), UnknownBlockError> {
        if self.block(turn_id, block_index).is_none() {
            return Err(UnknownBlockError::NotFound {
                turn_id,
                index: block_index,
            });
        }
        let key = ResultKey::new(turn_id, block_index);
        debug!(turn_id, block_index, status = %result.status_label(), "result recorded");
        self.results.insert(key, result);
        self.share_batch.retain(|k| *k != key);
        self.share_batch.push(key);
        self.last_shared = Some(key);
        Ok(())
    }

    pub fn result(&self, key: ResultKey) -> Option<&ExecutionResult> {
        self.results.get(&key)
    }

    pub fn results(&self) -> impl Iterator<Item = (ResultKey, &ExecutionResult)> {
        self.results.iter().map(|(k, v)| (*k, v))
    }

    /// The most recently recorded result.
    pub fn last_output(&self) -> Option<(ResultKey, &ExecutionResult)> {
        let key = self.last_shared?;
        self.results.get(&key).map(|r| (key, r))
    }

    /// Every result of the latest share batch, in run order.
    pub fn last_outputs(&self) -> Vec<(ResultKey, &ExecutionResult)> {
        self.share_batch
            .iter()
            .filter_map(|k| self.results.get(k).map(|r| (*k, r)))
            .collect()
    }

    /// Turns that carry blocks, newest first.
    pub fn turns_with_blocks(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().rev().filter(|t| !t.blocks.is_empty())
    }

    /// Start over as a new session. Turn ids and results belong to a session
    /// id, so the old ones are retired with it rather than reused.
    pub fn clear(&mut self) {
        let previous = std::mem::take(self);
        debug!(
            from = %previous.session_id,
            to = %self.session_id,
            turns = previous.turns.len(),
            "session cleared"
        );
    }
}
