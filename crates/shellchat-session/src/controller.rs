use crate::chooser::{BlockChooser, Candidate};
use crate::error::ControllerError;
use crate::request::{Request, RunSelector};
use crate::share::{format_command_record, format_share_payload};
use crate::state::{ControllerState, StateCell};
use shellchat_core::{
    scan_blocks, CommandBlock, ExecutionResult, InterruptReason, ResultKey, Role, TurnId,
    UnknownBlockError,
};
use shellchat_ledger::{load_session, save_session, Session, SessionSnapshot};
use shellchat_runner::{BlockRunner, CancellationToken, RunConfig};
use shellchat_transport::{system_prompt, HistoryMessage, Outbound, TokenUsage, Transport};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Context label for the newest candidate in interactive selection.
const CURRENT_RESPONSE: &str = "Current response";
const CONTEXT_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub run_config: RunConfig,
    /// Directory named in the system prompt.
    pub cwd: PathBuf,
    pub redact_shared_output: bool,
    pub cost_per_million: f64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            run_config: RunConfig::default(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            redact_shared_output: true,
            cost_per_million: TokenUsage::default().cost_per_million,
        }
    }
}

/// One block executed by a run request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRun {
    pub block: CommandBlock,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Assistant reply to a message or share.
    Reply {
        turn_id: TurnId,
        text: String,
        blocks: Vec<CommandBlock>,
        tokens: u64,
    },
    Ran(Vec<BlockRun>),
    Saved(PathBuf),
    Loaded { turns: usize },
    Cleared,
    Usage(TokenUsage),
    Blocks(Vec<CommandBlock>),
    Help,
    Exit(TokenUsage),
}

/// Drives one conversation: sends messages, runs blocks, shares output.
///
/// Shared as `Arc<SessionController>`; every method takes `&self`. At most
/// one request is in flight; [`SessionController::stop`] may be called from
/// any thread while a run is active.
pub struct SessionController {
    state: StateCell,
    session: RwLock<Session>,
    usage: Mutex<TokenUsage>,
    runner: Arc<dyn BlockRunner>,
    transport: Arc<dyn Transport>,
    chooser: Option<Box<dyn BlockChooser>>,
    options: ControllerOptions,
}

impl SessionController {
    pub fn new(
        runner: Arc<dyn BlockRunner>,
        transport: Arc<dyn Transport>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            state: StateCell::new(),
            session: RwLock::new(Session::new()),
            usage: Mutex::new(TokenUsage {
                cost_per_million: options.cost_per_million,
                ..TokenUsage::default()
            }),
            runner,
            transport,
            chooser: None,
            options,
        }
    }

    pub fn with_chooser(mut self, chooser: Box<dyn BlockChooser>) -> Self {
        self.chooser = Some(chooser);
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state.get()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read_session().snapshot()
    }

    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Interrupt the running command or abandon the pending reply.
    /// Idempotent; a no-op while Idle.
    pub fn stop(&self) -> bool {
        let stopped = self.state.stop();
        if stopped {
            info!("stop requested");
        }
        stopped
    }

    pub async fn dispatch(&self, request: Request) -> Result<Outcome, ControllerError> {
        match request {
            Request::SendMessage(text) => self.send_message(text).await,
            Request::Run(selector) => self.run(selector).await,
            Request::Bash(command) => self.bash(command).await,
            Request::Share { context } => self.share(context).await,
            Request::Save(path) => self.idle(|| {
                save_session(&path, &self.read_session())?;
                Ok(Outcome::Saved(path))
            }),
            Request::Load(path) => self.idle(|| {
                // Validated before anything is replaced.
                let loaded = load_session(&path)?;
                let turns = loaded.turns().len();
                *self.write_session() = loaded;
                Ok(Outcome::Loaded { turns })
            }),
            Request::Clear => self.idle(|| {
                self.write_session().clear();
                Ok(Outcome::Cleared)
            }),
            Request::Usage => self.idle(|| Ok(Outcome::Usage(self.usage()))),
            Request::Blocks => self.idle(|| {
                Ok(Outcome::Blocks(self.read_session().current_blocks().to_vec()))
            }),
            Request::Help => Ok(Outcome::Help),
            Request::Exit => self.idle(|| Ok(Outcome::Exit(self.usage()))),
        }
    }

    fn idle(
        &self,
        f: impl FnOnce() -> Result<Outcome, ControllerError>,
    ) -> Result<Outcome, ControllerError> {
        self.state.with_idle(f).map_err(ControllerError::Busy)?
    }

    // ── Conversation ──

    async fn send_message(&self, text: String) -> Result<Outcome, ControllerError> {
        let cancel = CancellationToken::new();
        let _lease = self
            .state
            .acquire(ControllerState::AwaitingReply, Some(cancel.clone()))
            .map_err(ControllerError::Busy)?;
        self.exchange(text, cancel).await
    }

    async fn share(&self, context: Option<String>) -> Result<Outcome, ControllerError> {
        let cancel = CancellationToken::new();
        let _lease = self
            .state
            .acquire(ControllerState::AwaitingReply, Some(cancel.clone()))
            .map_err(ControllerError::Busy)?;
        let (outputs, current_set) = {
            let session = self.read_session();
            let outputs: Vec<(ResultKey, ExecutionResult)> = session
                .last_outputs()
                .into_iter()
                .map(|(k, r)| (k, r.clone()))
                .collect();
            (outputs, session.current_set())
        };
        if outputs.is_empty() {
            return Err(ControllerError::NoOutput);
        }
        let payload = format_share_payload(
            context.as_deref(),
            &outputs,
            current_set,
            self.options.redact_shared_output,
        );
        debug!(results = outputs.len(), "sharing output");
        self.exchange(payload, cancel).await
    }

    /// Send `message` with the current history; append both turns on success.
    /// Nothing is appended when the request fails or is cancelled.
    async fn exchange(
        &self,
        message: String,
        cancel: CancellationToken,
    ) -> Result<Outcome, ControllerError> {
        let outbound = Outbound {
            system_prompt: system_prompt(&self.options.cwd),
            history: self
                .read_session()
                .turns()
                .iter()
                .map(|t| HistoryMessage::new(t.role, t.text.clone()))
                .collect(),
            message,
        };

        let reply = match cancel.run_until_cancelled(self.transport.send(&outbound)).await {
            Some(Ok(reply)) => reply,
            Some(Err(e)) => {
                warn!(error = %e, "assistant request failed");
                return Err(e.into());
            }
            None => {
                info!("assistant request abandoned");
                return Err(ControllerError::Cancelled);
            }
        };

        let extraction = scan_blocks(&reply.text);
        if let Some(ambiguity) = &extraction.ambiguity {
            warn!(?ambiguity, "reply has an unterminated code fence");
        }
        let (turn_id, blocks) = {
            let mut session = self.write_session();
            session.append_turn(Role::User, outbound.message, Vec::new());
            let turn_id = session.append_turn(Role::Assistant, reply.text.clone(), extraction.blocks);
            let blocks = session.turn(turn_id).map(|t| t.blocks.clone()).unwrap_or_default();
            (turn_id, blocks)
        };
        self.usage
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .add(reply.tokens);

        Ok(Outcome::Reply {
            turn_id,
            text: reply.text,
            blocks,
            tokens: reply.tokens,
        })
    }

    // ── Execution ──

    async fn run(&self, selector: RunSelector) -> Result<Outcome, ControllerError> {
        let cancel = CancellationToken::new();
        let _lease = self
            .state
            .acquire(ControllerState::Running, Some(cancel.clone()))
            .map_err(ControllerError::Busy)?;

        let blocks = match selector {
            RunSelector::Block(sel) => self.read_session().resolve(sel)?,
            RunSelector::Select => {
                let chooser = self.chooser.as_ref().ok_or(ControllerError::NoChooser)?;
                let candidates = self.candidates();
                let picked = chooser
                    .choose(&candidates)
                    .filter(|_| !cancel.is_cancelled())
                    .ok_or(ControllerError::SelectionCancelled)?;
                self.read_session().resolve(picked)?
            }
        };

        let mut runs = Vec::with_capacity(blocks.len());
        for block in blocks {
            if cancel.is_cancelled() {
                break;
            }
            debug!(turn_id = block.origin_turn_id, index = block.index, "running block");
            let result = self
                .runner
                .run(&block.source_text, &self.options.run_config, cancel.clone())
                .await?;
            {
                let mut session = self.write_session();
                if runs.is_empty() {
                    session.begin_batch();
                }
                session.record_result(block.origin_turn_id, block.index, result.clone())?;
            }
            let stopped_by_user = result.interrupt_reason == Some(InterruptReason::User);
            runs.push(BlockRun { block, result });
            if stopped_by_user {
                info!("batch stopped by user");
                break;
            }
        }
        Ok(Outcome::Ran(runs))
    }

    /// Run a command typed by the user. It is recorded as a user turn carrying
    /// one block plus its result, and becomes the share batch.
    async fn bash(&self, command: String) -> Result<Outcome, ControllerError> {
        let cancel = CancellationToken::new();
        let _lease = self
            .state
            .acquire(ControllerState::Running, Some(cancel.clone()))
            .map_err(ControllerError::Busy)?;

        debug!("running user command");
        let result = self
            .runner
            .run(&command, &self.options.run_config, cancel)
            .await?;

        let record = format_command_record(&command, &result, self.options.redact_shared_output);
        let block = {
            let mut session = self.write_session();
            let turn_id = session.append_turn(
                Role::User,
                record,
                vec![CommandBlock::new(1, command, Some("bash".to_string()))],
            );
            session.begin_batch();
            session.record_result(turn_id, 1, result.clone())?;
            session
                .block(turn_id, 1)
                .cloned()
                .ok_or(UnknownBlockError::NotFound { turn_id, index: 1 })?
        };
        Ok(Outcome::Ran(vec![BlockRun { block, result }]))
    }

    /// Turns with blocks, newest first, labelled with what prompted them.
    fn candidates(&self) -> Vec<Candidate> {
        let session = self.read_session();
        let current = session.current_set();
        session
            .turns_with_blocks()
            .map(|turn| {
                let context = if Some(turn.id) == current {
                    CURRENT_RESPONSE.to_string()
                } else if turn.role == Role::User {
                    preview(&turn.text)
                } else {
                    prompting_message(session.turns(), turn.id)
                };
                Candidate {
                    turn_id: turn.id,
                    context,
                    blocks: turn.blocks.clone(),
                }
            })
            .collect()
    }

    fn read_session(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Preview of the user message right before `turn_id`.
fn prompting_message(turns: &[shellchat_core::Turn], turn_id: TurnId) -> String {
    let text = turns
        .iter()
        .rev()
        .skip_while(|t| t.id >= turn_id)
        .find(|t| t.role == Role::User)
        .map(|t| t.text.as_str())
        .unwrap_or("");
    preview(text)
}

/// First line of `text`, cut to a short preview.
fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() > CONTEXT_PREVIEW_CHARS {
        let cut: String = first_line.chars().take(CONTEXT_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chooser::{Pick, ScriptedChooser};
    use std::sync::Weak;
    use shellchat_core::BlockSelector;
    use shellchat_runner::{MockOutcome, MockRunner, RunError, ShellRunner};
    use shellchat_transport::{MockTransport, TransportError};
    use std::time::Duration;

    struct Fixture {
        controller: Arc<SessionController>,
        runner: Arc<MockRunner>,
        transport: Arc<MockTransport>,
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn fixture_with(chooser: Option<Box<dyn BlockChooser>>) -> Fixture {
        let runner = Arc::new(MockRunner::new());
        let transport = Arc::new(MockTransport::new());
        let mut controller =
            SessionController::new(runner.clone(), transport.clone(), options());
        if let Some(chooser) = chooser {
            controller = controller.with_chooser(chooser);
        }
        Fixture {
            controller: Arc::new(controller),
            runner,
            transport,
        }
    }

    fn options() -> ControllerOptions {
        ControllerOptions {
            run_config: RunConfig::default().with_shell("sh"),
            cwd: PathBuf::from("/work"),
            ..ControllerOptions::default()
        }
    }

    async fn say(f: &Fixture, reply: &str) -> Outcome {
        f.transport.push_reply(reply);
        f.controller
            .dispatch(Request::SendMessage("question".into()))
            .await
            .unwrap()
    }

    fn run_index(n: usize) -> Request {
        Request::Run(RunSelector::Block(BlockSelector::Index(n)))
    }

    async fn wait_for(controller: &SessionController, state: ControllerState) {
        for _ in 0..200 {
            if controller.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("controller never reached {state:?}");
    }

    #[tokio::test]
    async fn reply_run_share_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let mut opts = options();
        opts.run_config.script_dir = Some(dir.path().to_path_buf());
        let controller =
            SessionController::new(Arc::new(ShellRunner::new()), transport.clone(), opts);

        transport.push_reply("Try:\n```\necho hi\n```\n");
        let outcome = controller
            .dispatch(Request::SendMessage("say hi".into()))
            .await
            .unwrap();
        let Outcome::Reply { blocks, .. } = outcome else {
            panic!("expected reply");
        };
        assert_eq!(blocks.len(), 1);

        let Outcome::Ran(runs) = controller.dispatch(run_index(1)).await.unwrap() else {
            panic!("expected run");
        };
        assert!(runs[0].result.stdout.contains("hi"));
        assert_eq!(runs[0].result.exit_code, 0);

        transport.push_reply("Looks good.");
        controller
            .dispatch(Request::Share { context: None })
            .await
            .unwrap();
        let sent = transport.sent();
        let payload = &sent.last().unwrap().message;
        assert!(payload.contains("Output from block 1 (exit 0):\n```\nhi\n```"));
        assert_eq!(sent[1].history.len(), 2);
        assert!(sent[0].system_prompt.contains("Directory: /work"));
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(controller.snapshot().turns.len(), 4);
    }

    #[tokio::test]
    async fn message_appends_turns_and_counts_tokens() {
        let f = fixture();
        let Outcome::Reply { turn_id, tokens, .. } = say(&f, "```\nls\n```").await else {
            panic!("expected reply");
        };
        assert_eq!(turn_id, 2);
        assert_eq!(f.controller.usage().total_tokens, tokens);
        let snap = f.controller.snapshot();
        assert_eq!(snap.turns[0].role, Role::User);
        assert_eq!(snap.turns[0].text, "question");
    }

    #[tokio::test]
    async fn transport_failure_appends_nothing() {
        let f = fixture();
        f.transport.push_failure("connection refused");
        let err = f
            .controller
            .dispatch(Request::SendMessage("hello".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Transport(TransportError::Http(_))));
        assert!(f.controller.snapshot().turns.is_empty());
        assert_eq!(f.controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn unknown_block_returns_to_idle() {
        let f = fixture();
        say(&f, "```\na\n```").await;
        let err = f.controller.dispatch(run_index(5)).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::UnknownBlock(UnknownBlockError::OutOfRange { index: 5, .. })
        ));
        assert_eq!(f.controller.state(), ControllerState::Idle);
        assert!(f.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn reply_without_blocks_rejects_run() {
        let f = fixture();
        say(&f, "```\na\n```").await;
        say(&f, "Nothing to run here.").await;
        let err = f.controller.dispatch(run_index(1)).await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::UnknownBlock(UnknownBlockError::NoBlockSet)
        ));
    }

    #[tokio::test]
    async fn spawn_error_surfaces_and_keeps_previous_batch() {
        let f = fixture();
        say(&f, "```\na\n```\n```\nb\n```").await;
        f.controller.dispatch(run_index(1)).await.unwrap();
        f.runner.push(MockOutcome::SpawnFailure("sh".into()));
        let err = f.controller.dispatch(run_index(2)).await.unwrap_err();
        assert!(matches!(err, ControllerError::Run(RunError::Spawn { .. })));
        assert_eq!(f.controller.state(), ControllerState::Idle);

        f.transport.push_reply("ok");
        f.controller
            .dispatch(Request::Share { context: None })
            .await
            .unwrap();
        assert!(f.transport.sent().last().unwrap().message.contains("block 1"));
    }

    #[tokio::test]
    async fn run_all_executes_in_order_and_batches() {
        let f = fixture();
        say(&f, "```\none\n```\n```\ntwo\n```\n```\nthree\n```").await;
        let Outcome::Ran(runs) = f
            .controller
            .dispatch(Request::Run(RunSelector::Block(BlockSelector::All)))
            .await
            .unwrap()
        else {
            panic!("expected run");
        };
        assert_eq!(runs.len(), 3);
        assert_eq!(f.runner.calls(), vec!["one", "two", "three"]);
        assert_eq!(f.controller.snapshot().share_batch.len(), 3);
    }

    #[tokio::test]
    async fn timeout_only_ends_current_block_but_user_stop_ends_batch() {
        let f = fixture();
        say(&f, "```\none\n```\n```\ntwo\n```\n```\nthree\n```").await;
        f.runner.push(MockOutcome::Finish(ExecutionResult::interrupted(
            InterruptReason::Timeout,
            Duration::from_millis(5),
        )));
        let all = Request::Run(RunSelector::Block(BlockSelector::All));
        let Outcome::Ran(runs) = f.controller.dispatch(all.clone()).await.unwrap() else {
            panic!("expected run");
        };
        assert_eq!(runs.len(), 3);

        f.runner.push(MockOutcome::Finish(ExecutionResult::exited(0, Duration::ZERO)));
        f.runner.push(MockOutcome::Finish(ExecutionResult::interrupted(
            InterruptReason::User,
            Duration::ZERO,
        )));
        let Outcome::Ran(runs) = f.controller.dispatch(all).await.unwrap() else {
            panic!("expected run");
        };
        assert_eq!(runs.len(), 2);
        assert_eq!(f.controller.snapshot().share_batch.len(), 2);
    }

    #[tokio::test]
    async fn busy_while_running_and_stop_is_idempotent() {
        let f = fixture();
        say(&f, "```\nsleep 100\n```\n```\nnever\n```").await;
        f.runner.push(MockOutcome::UntilCancelled);

        let controller = f.controller.clone();
        let handle = tokio::spawn(async move {
            controller
                .dispatch(Request::Run(RunSelector::Block(BlockSelector::All)))
                .await
        });
        wait_for(&f.controller, ControllerState::Running).await;

        let busy = f
            .controller
            .dispatch(Request::SendMessage("hi".into()))
            .await
            .unwrap_err();
        assert!(matches!(busy, ControllerError::Busy(ControllerState::Running)));
        assert!(matches!(
            f.controller.dispatch(Request::Clear).await,
            Err(ControllerError::Busy(_))
        ));

        assert!(f.controller.stop());
        assert!(!f.controller.stop());

        let Outcome::Ran(runs) = handle.await.unwrap().unwrap() else {
            panic!("expected run");
        };
        assert_eq!(runs.len(), 1);
        assert!(runs[0].result.interrupted);
        assert_eq!(f.runner.calls().len(), 1);
        assert_eq!(f.controller.state(), ControllerState::Idle);
        assert!(!f.controller.stop());
    }

    #[tokio::test]
    async fn select_offers_newest_first_and_runs_pick() {
        let chooser = Arc::new(ScriptedChooser::new([
            Pick::Block { skip: 1, index: 2 },
            Pick::Cancel,
        ]));
        let f = fixture_with(Some(Box::new(chooser.clone())));
        say(&f, "```\nold-1\n```\n```\nold-2\n```").await;
        say(&f, "```\nnew-1\n```").await;

        let Outcome::Ran(runs) = f
            .controller
            .dispatch(Request::Run(RunSelector::Select))
            .await
            .unwrap()
        else {
            panic!("expected run");
        };
        assert_eq!(runs[0].block.source_text, "old-2");
        assert_eq!(runs[0].block.origin_turn_id, 2);

        let err = f
            .controller
            .dispatch(Request::Run(RunSelector::Select))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::SelectionCancelled));
        assert_eq!(f.controller.state(), ControllerState::Idle);
        assert_eq!(chooser.seen(), vec![vec![4, 2], vec![4, 2]]);
    }

    /// Chooser that presses Ctrl+C while the user is picking.
    struct StopsWhileChoosing(Arc<Mutex<Weak<SessionController>>>);

    impl BlockChooser for StopsWhileChoosing {
        fn choose(&self, candidates: &[Candidate]) -> Option<BlockSelector> {
            if let Some(controller) = self.0.lock().unwrap().upgrade() {
                assert!(controller.stop());
            }
            candidates.first().map(|c| BlockSelector::At {
                turn_id: c.turn_id,
                index: 1,
            })
        }
    }

    #[tokio::test]
    async fn stop_during_selection_runs_nothing() {
        let handle = Arc::new(Mutex::new(Weak::new()));
        let f = fixture_with(Some(Box::new(StopsWhileChoosing(handle.clone()))));
        *handle.lock().unwrap() = Arc::downgrade(&f.controller);
        say(&f, "```
a
```").await;

        let err = f
            .controller
            .dispatch(Request::Run(RunSelector::Select))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::SelectionCancelled));
        assert!(f.runner.calls().is_empty());
        assert_eq!(f.controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn stop_abandons_pending_reply() {
        let f = fixture();
        f.transport.push_pending();
        let controller = f.controller.clone();
        let handle = tokio::spawn(async move {
            controller
                .dispatch(Request::SendMessage("slow question".into()))
                .await
        });
        wait_for(&f.controller, ControllerState::AwaitingReply).await;

        assert!(f.controller.stop());
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ControllerError::Cancelled));
        assert!(f.controller.snapshot().turns.is_empty());
        assert_eq!(f.controller.state(), ControllerState::Idle);
        assert_eq!(f.controller.usage().total_tokens, 0);

        say(&f, "back again").await;
        assert_eq!(f.controller.snapshot().turns.len(), 2);
    }

    #[tokio::test]
    async fn bash_records_a_user_turn_and_feeds_share() {
        let f = fixture();
        say(&f, "```
a
```").await;

        let Outcome::Ran(runs) = f
            .controller
            .dispatch(Request::Bash("ls /tmp".into()))
            .await
            .unwrap()
        else {
            panic!("expected run");
        };
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].block.origin_turn_id, 3);
        assert_eq!(runs[0].block.source_text, "ls /tmp");
        assert_eq!(f.runner.calls(), vec!["ls /tmp"]);

        let snap = f.controller.snapshot();
        assert_eq!(snap.turns[2].role, Role::User);
        assert!(snap.turns[2]
            .text
            .starts_with("!bash ls /tmp\n\nOutput (exit 0):\n```\nls /tmp\n```"));
        assert_eq!(snap.share_batch, vec![ResultKey::new(3, 1)]);

        f.transport.push_reply("seen it");
        f.controller
            .dispatch(Request::Share { context: None })
            .await
            .unwrap();
        let sent = f.transport.sent().last().unwrap().clone();
        assert!(sent
            .message
            .contains("Output from block 1 of turn 3 (exit 0):\n```\nls /tmp\n```"));
        assert_eq!(sent.history.len(), 3);

        // "block 1" still means the last reply's block.
        let Outcome::Ran(runs) = f.controller.dispatch(run_index(1)).await.unwrap() else {
            panic!("expected run");
        };
        assert_eq!(runs[0].block.source_text, "a");
    }

    #[tokio::test]
    async fn bash_spawn_failure_records_nothing() {
        let f = fixture();
        f.runner.push(MockOutcome::SpawnFailure("sh".into()));
        let err = f
            .controller
            .dispatch(Request::Bash("ls".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Run(RunError::Spawn { .. })));
        assert!(f.controller.snapshot().turns.is_empty());
        assert_eq!(f.controller.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn select_without_chooser_fails() {
        let f = fixture();
        say(&f, "```\na\n```").await;
        assert!(matches!(
            f.controller.dispatch(Request::Run(RunSelector::Select)).await,
            Err(ControllerError::NoChooser)
        ));
    }

    #[tokio::test]
    async fn share_without_output_fails() {
        let f = fixture();
        say(&f, "```\na\n```").await;
        let err = f
            .controller
            .dispatch(Request::Share { context: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NoOutput));
        assert_eq!(f.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn share_includes_context_and_redacts() {
        let f = fixture();
        say(&f, "```\nenv\n```").await;
        let mut env = ExecutionResult::exited(0, Duration::ZERO);
        env.stdout = "ANTHROPIC_API_KEY=sk-ant-REDACTED\n".into();
        f.runner.push(MockOutcome::Finish(env));
        f.controller.dispatch(run_index(1)).await.unwrap();

        f.transport.push_reply("thanks");
        f.controller
            .dispatch(Request::Share {
                context: Some("is this right?".into()),
            })
            .await
            .unwrap();
        let message = f.transport.sent().last().unwrap().message.clone();
        assert!(message.starts_with("is this right?\n\n"));
        assert!(!message.contains("sk-ant-api03"));
    }

    #[tokio::test]
    async fn save_load_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let f = fixture();
        say(&f, "```\na\n```").await;
        f.controller.dispatch(run_index(1)).await.unwrap();
        let before = f.controller.snapshot();

        f.controller.dispatch(Request::Save(path.clone())).await.unwrap();
        f.controller.dispatch(Request::Clear).await.unwrap();
        assert!(f.controller.snapshot().turns.is_empty());

        let outcome = f.controller.dispatch(Request::Load(path)).await.unwrap();
        assert_eq!(outcome, Outcome::Loaded { turns: 2 });
        assert_eq!(f.controller.snapshot(), before);
    }

    #[tokio::test]
    async fn failed_load_keeps_current_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{}").unwrap();
        let f = fixture();
        say(&f, "```\na\n```").await;
        let err = f.controller.dispatch(Request::Load(path)).await.unwrap_err();
        assert!(matches!(err, ControllerError::Persistence(_)));
        assert_eq!(f.controller.snapshot().turns.len(), 2);
    }

    #[tokio::test]
    async fn blocks_and_usage_queries() {
        let f = fixture();
        say(&f, "```\nls\n```").await;
        let Outcome::Blocks(blocks) = f.controller.dispatch(Request::Blocks).await.unwrap() else {
            panic!("expected blocks");
        };
        assert_eq!(blocks[0].source_text, "ls");
        let Outcome::Usage(usage) = f.controller.dispatch(Request::Usage).await.unwrap() else {
            panic!("expected usage");
        };
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn prompting_message_preview() {
        let mut session = Session::new();
        session.append_turn(Role::User, "x".repeat(60), vec![]);
        let id = session.append_turn(Role::Assistant, "ok", vec![]);
        let preview = prompting_message(session.turns(), id);
        assert_eq!(preview, format!("{}...", "x".repeat(50)));
    }
}
