use shellchat_core::{BlockSelector, CommandBlock, TurnId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One assistant turn offered for interactive selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub turn_id: TurnId,
    /// "Current response", or the user message that prompted the turn.
    pub context: String,
    pub blocks: Vec<CommandBlock>,
}

/// Picks a block interactively. Candidates arrive newest first; the chooser
/// walks them as it likes and returns an explicit `At` selector, or `None`
/// when the user cancels or runs out of turns.
pub trait BlockChooser: Send + Sync {
    fn choose(&self, candidates: &[Candidate]) -> Option<BlockSelector>;
}

impl<T: BlockChooser + ?Sized> BlockChooser for Arc<T> {
    fn choose(&self, candidates: &[Candidate]) -> Option<BlockSelector> {
        (**self).choose(candidates)
    }
}

/// What a [`ScriptedChooser`] does on one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// Skip this many candidates, then take block `index` of the next one.
    Block { skip: usize, index: usize },
    Cancel,
}

/// Chooser driven by a queue of picks, for tests.
#[derive(Default)]
pub struct ScriptedChooser {
    picks: Mutex<VecDeque<Pick>>,
    seen: Mutex<Vec<Vec<TurnId>>>,
}

impl ScriptedChooser {
    pub fn new(picks: impl IntoIterator<Item = Pick>) -> Self {
        Self {
            picks: Mutex::new(picks.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Candidate turn ids offered on each call.
    pub fn seen(&self) -> Vec<Vec<TurnId>> {
        self.seen.lock().unwrap().clone()
    }
}

impl BlockChooser for ScriptedChooser {
    fn choose(&self, candidates: &[Candidate]) -> Option<BlockSelector> {
        self.seen
            .lock()
            .unwrap()
            .push(candidates.iter().map(|c| c.turn_id).collect());
        match self.picks.lock().unwrap().pop_front()? {
            Pick::Cancel => None,
            Pick::Block { skip, index } => candidates.get(skip).map(|c| BlockSelector::At {
                turn_id: c.turn_id,
                index,
            }),
        }
    }
}
