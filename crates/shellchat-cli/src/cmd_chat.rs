use crate::chooser::TerminalChooser;
use crate::config::AppConfig;
use crate::render;
use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{Config, Editor};
use shellchat_session::{
    parse_input, ControllerOptions, Outcome, Request, SessionController,
};
use shellchat_runner::{verify_shell, ShellRunner};
use shellchat_store::StorePaths;
use shellchat_transport::{AnthropicTransport, TokenUsage};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

const PROMPT: &str = "> ";

fn build_controller(config: &AppConfig, interactive: bool) -> anyhow::Result<SessionController> {
    let run_config = config.run_config();
    verify_shell(&run_config.shell_path)
        .with_context(|| format!("checking shell {}", run_config.shell_path.display()))?;
    let options = ControllerOptions {
        run_config,
        cwd: std::env::current_dir()?,
        redact_shared_output: config.redact_shared_output,
        cost_per_million: config.cost_per_million,
    };
    let transport = AnthropicTransport::new(config.transport_config());
    let controller =
        SessionController::new(Arc::new(ShellRunner::new()), Arc::new(transport), options);
    Ok(if interactive {
        controller.with_chooser(Box::new(TerminalChooser::stdio()))
    } else {
        controller
    })
}

fn load_config(paths: &StorePaths) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load(&paths.config_json)?;
    if config.api_key.is_none() {
        anyhow::bail!("ANTHROPIC_API_KEY environment variable is not set");
    }
    Ok(config)
}

/// `shellchat <message...>`: one exchange, reply on stdout.
pub fn single(paths: &StorePaths, message: &str) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    let controller = build_controller(&config, false)?;
    let rt = Runtime::new()?;
    let outcome = rt.block_on(controller.dispatch(Request::SendMessage(message.to_string())))?;
    println!("{}", render::outcome(&outcome));
    Ok(())
}

/// `shellchat chat [--load <file>]`: the interactive loop.
pub fn interactive(paths: &StorePaths, load: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    paths.ensure_layout()?;
    let controller = Arc::new(build_controller(&config, true)?);
    let rt = Runtime::new()?;
    let load = load.map(|name| paths.session_file(name));
    if let Some(path) = &load {
        rt.block_on(controller.dispatch(Request::Load(path.clone())))
            .with_context(|| format!("loading session {}", path.display()))?;
    }

    // Ctrl+C outside the line editor stops the running command or pending reply.
    let handler = controller.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler.stop();
    }) {
        warn!(error = %e, "could not install Ctrl+C handler");
    }

    let editor_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), FileHistory> = Editor::with_config(editor_config)?;
    let _ = rl.load_history(&paths.command_history);

    println!("{}", render::banner(&paths.command_history));
    if let Some(path) = load {
        println!("Loaded session from {}", path.display());
    }

    let usage = repl(&rt, &controller, paths, &mut rl)?;
    println!("\n{}", usage.summary());

    if let Err(e) = rl.save_history(&paths.command_history) {
        warn!(error = %e, "could not save command history");
    }
    Ok(())
}

fn repl(
    rt: &Runtime,
    controller: &SessionController,
    paths: &StorePaths,
    rl: &mut Editor<(), FileHistory>,
) -> anyhow::Result<TokenUsage> {
    loop {
        let line = match rl.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("Use !exit or Ctrl+D to quit");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let request = match parse_input(&line) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };
        debug!(?request, "dispatching");
        match dispatch(rt, controller, paths, request) {
            Ok(Outcome::Exit(_)) => break,
            Ok(outcome) => println!("{}", render::outcome(&outcome)),
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }
    Ok(controller.usage())
}

fn dispatch(
    rt: &Runtime,
    controller: &SessionController,
    paths: &StorePaths,
    request: Request,
) -> anyhow::Result<Outcome> {
    match request {
        Request::Save(name) => {
            // Serialize saves from concurrent shellchat processes.
            let _guard = shellchat_store::lock_file(&paths.lock_file)?;
            let request = Request::Save(paths.session_file(&name));
            Ok(rt.block_on(controller.dispatch(request))?)
        }
        Request::Load(name) => {
            let request = Request::Load(paths.session_file(&name));
            Ok(rt.block_on(controller.dispatch(request))?)
        }
        request => Ok(rt.block_on(controller.dispatch(request))?),
    }
}
