use crate::error::PersistenceError;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use shellchat_core::{ExecutionResult, ResultKey, Turn, TurnId};
use std::collections::BTreeMap;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable form of a [`Session`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub version: u32,
    pub session_id: String,
    pub created_at: String,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub results: Vec<ResultRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_shared: Option<ResultKey>,
    #[serde(default)]
    pub share_batch: Vec<ResultKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultRecord {
    pub turn_id: TurnId,
    pub block_index: usize,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

impl Session {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.session_id.clone(),
            created_at: self.created_at.clone(),
            turns: self.turns.clone(),
            results: self
                .results
                .iter()
                .map(|(k, r)| ResultRecord {
                    turn_id: k.turn_id,
                    block_index: k.block_index,
                    result: r.clone(),
                })
                .collect(),
            last_shared: self.last_shared,
            share_batch: self.share_batch.clone(),
        }
    }

    /// Rebuild a session from a snapshot, rejecting anything that breaks the
    /// ledger's invariants.
    pub fn restore(snapshot: SessionSnapshot) -> Result<Session, PersistenceError> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(PersistenceError::invalid(format!(
                "unsupported version {} (max {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        let mut session = Session {
            session_id: snapshot.session_id,
            created_at: snapshot.created_at,
            turns: Vec::with_capacity(snapshot.turns.len()),
            results: BTreeMap::new(),
            last_shared: None,
            share_batch: Vec::new(),
            current_set: None,
            next_turn_id: 1,
        };

        let mut prev = 0;
        for mut turn in snapshot.turns {
            if turn.id <= prev {
                return Err(PersistenceError::invalid(format!(
                    "turn ids must increase (turn {} after {prev})",
                    turn.id
                )));
            }
            for (i, block) in turn.blocks.iter_mut().enumerate() {
                if block.index != i + 1 {
                    return Err(PersistenceError::invalid(format!(
                        "turn {} block {} is out of sequence",
                        turn.id, block.index
                    )));
                }
                block.origin_turn_id = turn.id;
            }
            prev = turn.id;
            session.track_block_set(&turn);
            session.turns.push(turn);
        }
        session.next_turn_id = prev + 1;

        for record in snapshot.results {
            let key = ResultKey::new(record.turn_id, record.block_index);
            if session.block(key.turn_id, key.block_index).is_none() {
                return Err(PersistenceError::invalid(format!(
                    "result for unknown block {}:{}",
                    key.turn_id, key.block_index
                )));
            }
            if session.results.insert(key, record.result).is_some() {
                return Err(PersistenceError::invalid(format!(
                    "duplicate result for block {}:{}",
                    key.turn_id, key.block_index
                )));
            }
        }

        for key in snapshot.share_batch {
            if !session.results.contains_key(&key) {
                return Err(PersistenceError::invalid(format!(
                    "share batch names missing result {}:{}",
                    key.turn_id, key.block_index
                )));
            }
            session.share_batch.push(key);
        }
        if let Some(key) = snapshot.last_shared {
            if !session.results.contains_key(&key) {
                return Err(PersistenceError::invalid(format!(
                    "last shared output {}:{} has no result",
                    key.turn_id, key.block_index
                )));
            }
            session.last_shared = Some(key);
        }

        Ok(session)
    }
}
