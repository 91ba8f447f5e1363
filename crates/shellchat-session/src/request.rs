use shellchat_core::BlockSelector;
use std::path::PathBuf;

/// Which block(s) a run request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSelector {
    Block(BlockSelector),
    /// Ask the chooser.
    Select,
}

/// Everything the front-end can ask of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    SendMessage(String),
    Run(RunSelector),
    /// Run a command typed by the user, outside any reply.
    Bash(String),
    Share { context: Option<String> },
    Save(PathBuf),
    Load(PathBuf),
    Clear,
    Usage,
    Blocks,
    Help,
    Exit,
}

/// Parse one line of user input. `Err` carries a message for the user.
pub fn parse_input(line: &str) -> Result<Option<Request>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('!') {
        return Ok(Some(Request::SendMessage(line.to_string())));
    }

    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    let request = match cmd {
        "!run" => Request::Run(parse_run_selector(arg)?),
        "!bash" if arg.is_empty() => return Err("usage: !bash <command>".to_string()),
        "!bash" => Request::Bash(arg.to_string()),
        "!share" => Request::Share {
            context: (!arg.is_empty()).then(|| arg.to_string()),
        },
        "!save" => Request::Save(required_path(cmd, arg)?),
        "!load" => Request::Load(required_path(cmd, arg)?),
        "!clear" => Request::Clear,
        "!tokens" => Request::Usage,
        "!blocks" => Request::Blocks,
        "!help" => Request::Help,
        "!exit" | "!quit" => Request::Exit,
        other => return Err(format!("unknown command {other} (try !help)")),
    };
    Ok(Some(request))
}

/// `<empty>` is block 1; otherwise a number, `all` or `select`.
fn parse_run_selector(arg: &str) -> Result<RunSelector, String> {
    match arg {
        "" => Ok(RunSelector::Block(BlockSelector::Index(1))),
        "all" => Ok(RunSelector::Block(BlockSelector::All)),
        "select" => Ok(RunSelector::Select),
        n => n
            .parse::<usize>()
            .map(|n| RunSelector::Block(BlockSelector::Index(n)))
            .map_err(|_| format!("invalid block number: {n}")),
    }
}

fn required_path(cmd: &str, arg: &str) -> Result<PathBuf, String> {
    if arg.is_empty() {
        return Err(format!("usage: {cmd} <file>"));
    }
    Ok(PathBuf::from(arg))
}

pub const HELP: &[(&str, &str)] = &[
    ("!run [n|all|select]", "Run block n (default 1), every block, or pick one"),
    ("!bash <command>", "Run a command yourself; its output can be shared"),
    ("!share [context]", "Send the last run's output to the assistant"),
    ("!blocks", "List the blocks of the last response"),
    ("!save <file>", "Save the session (bare names go to the store's sessions/)"),
    ("!load <file>", "Load a saved session (same lookup as !save)"),
    ("!clear", "Clear the conversation"),
    ("!tokens", "Show token usage and cost"),
    ("!help", "Show this help"),
    ("!exit", "Exit"),
    ("Ctrl+C", "Stop the running command"),
];
