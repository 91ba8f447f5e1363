use shellchat_core::BlockSelector;
use shellchat_session::{BlockChooser, Candidate};
use std::io::Write;
use std::sync::Mutex;

const PROMPT: &str = "\nSelect block number (Enter for older commands, 'q' to cancel): ";

/// Where the chooser's answers come from.
pub trait LineSource: Send {
    /// Next answer, or `None` when the user interrupts or input ends.
    fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// Reads answers through a fresh line editor, so Ctrl+C ends the prompt at
/// once instead of waiting for Enter.
struct EditorLines;

impl LineSource for EditorLines {
    fn read_line(&mut self, prompt: &str) -> Option<String> {
        let mut editor = rustyline::DefaultEditor::new().ok()?;
        editor.readline(prompt).ok()
    }
}

/// Walks candidate turns newest first on the terminal: a number picks a
/// block, Enter moves to older turns, `q` or Ctrl+C cancels.
pub struct TerminalChooser {
    input: Mutex<Box<dyn LineSource>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl TerminalChooser {
    pub fn stdio() -> Self {
        Self::new(Box::new(EditorLines), Box::new(std::io::stdout()))
    }

    pub fn new(input: Box<dyn LineSource>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }
}

enum Answer {
    Pick(usize),
    Older,
    Cancel,
}

impl BlockChooser for TerminalChooser {
    fn choose(&self, candidates: &[Candidate]) -> Option<BlockSelector> {
        let mut input = self.input.lock().ok()?;
        let mut out = self.output.lock().ok()?;

        for candidate in candidates {
            let _ = writeln!(out, "\n{}:", candidate.context);
            for block in &candidate.blocks {
                let _ = writeln!(out, "\nBlock {}:\n{}", block.index, block.source_text);
            }
            loop {
                let _ = out.flush();
                let Some(line) = input.read_line(PROMPT) else {
                    let _ = writeln!(out, "Selection cancelled");
                    return None;
                };
                match parse_answer(&line) {
                    Some(Answer::Cancel) => {
                        let _ = writeln!(out, "Selection cancelled");
                        return None;
                    }
                    Some(Answer::Older) => break,
                    Some(Answer::Pick(n)) if (1..=candidate.blocks.len()).contains(&n) => {
                        return Some(BlockSelector::At {
                            turn_id: candidate.turn_id,
                            index: n,
                        });
                    }
                    Some(Answer::Pick(n)) => {
                        let _ = writeln!(out, "Block number {n} out of range");
                    }
                    None => {
                        let _ = writeln!(out, "Invalid input: {}", line.trim());
                    }
                }
            }
        }
        let _ = writeln!(out, "No more commands found in history");
        None
    }
}

fn parse_answer(line: &str) -> Option<Answer> {
    match line.trim().to_lowercase().as_str() {
        "" => Some(Answer::Older),
        "q" => Some(Answer::Cancel),
        n => n.parse().ok().map(Answer::Pick),
    }
}
