use shellchat_core::CommandBlock;
use shellchat_session::{BlockRun, Outcome, HELP};
use std::path::Path;

/// Text shown to the user for a controller outcome.
pub fn outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Reply {
            text,
            blocks,
            tokens,
            ..
        } => reply(text, blocks, *tokens),
        Outcome::Ran(runs) if runs.is_empty() => "Nothing was run.".to_string(),
        Outcome::Ran(runs) => runs.iter().map(run_footer).collect::<Vec<_>>().join("\n"),
        Outcome::Saved(path) => format!("Session saved to {}", path.display()),
        Outcome::Loaded { turns } => format!("Session loaded ({turns} turns)"),
        Outcome::Cleared => "Session history cleared".to_string(),
        Outcome::Usage(usage) | Outcome::Exit(usage) => usage.summary(),
        Outcome::Blocks(blocks) => block_list(blocks),
        Outcome::Help => help(),
    }
}

fn reply(text: &str, blocks: &[CommandBlock], tokens: u64) -> String {
    let mut out = text.trim_end().to_string();
    match blocks.len() {
        0 => {}
        1 => out.push_str("\n\n[1 command block: !run to execute it]"),
        n => out.push_str(&format!(
            "\n\n[{n} command blocks: !run <1-{n}|all|select>]"
        )),
    }
    out.push_str(&format!("\n\nTokens used in this interaction: {tokens}"));
    out
}

/// One status line per executed block; output was already streamed live.
fn run_footer(run: &BlockRun) -> String {
    let r = &run.result;
    let mut line = format!(
        "── block {} · {} · {} ms",
        run.block.index,
        r.status_label(),
        r.duration.as_millis()
    );
    if r.truncated() {
        line.push_str(" · output truncated");
    }
    line.push_str(" ──");
    line
}

fn block_list(blocks: &[CommandBlock]) -> String {
    if blocks.is_empty() {
        return "No command blocks in the last response".to_string();
    }
    blocks
        .iter()
        .map(|b| match b.source_text.lines().count() {
            1 => format!("{:>3}  {}", b.index, b.headline()),
            n => format!("{:>3}  {}  (+{} lines)", b.index, b.headline(), n - 1),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn help() -> String {
    let width = HELP.iter().map(|(cmd, _)| cmd.len()).max().unwrap_or(0);
    let mut out = String::from("Commands:\n");
    for (cmd, desc) in HELP {
        out.push_str(&format!("  {cmd:<width$}  {desc}\n"));
    }
    out.push_str("\nAnything else is sent to the assistant.");
    out
}

pub fn banner(history: &Path) -> String {
    format!(
        "shellchat {}: type a question, !help for commands, Ctrl+D to quit\nhistory: {}",
        env!("CARGO_PKG_VERSION"),
        history.display()
    )
}
