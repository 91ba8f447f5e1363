use crate::types::CommandBlock;

/// A structural problem in a reply that extraction resolved on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAmbiguity {
    /// Fence opened on `line` (1-based) and never closed; the rest of the
    /// reply became the last block.
    UnterminatedFence { line: usize },
}

/// Blocks found in one reply plus any ambiguity met on the way.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub blocks: Vec<CommandBlock>,
    pub ambiguity: Option<ParseAmbiguity>,
}

#[derive(Debug)]
struct Fence {
    ch: char,
    len: usize,
    info: Option<String>,
}

/// Recognize a fence line: at least three backticks or tildes, optionally
/// followed by an info string.
fn parse_fence(line: &str) -> Option<Fence> {
    let trimmed = line.trim();
    let ch = trimmed.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|c| *c == ch).count();
    if len < 3 {
        return None;
    }
    // Fence chars are ASCII, so `len` is also a byte offset.
    let rest = trimmed[len..].trim();
    // ```inline``` on one line is code, not a fence
    if ch == '`' && rest.contains('`') {
        return None;
    }
    let info = rest.split_whitespace().next().map(str::to_string);
    Some(Fence { ch, len, info })
}

/// A closing fence matches the opener's char, is at least as long, and
/// carries no info string. Anything else is content of the open block.
fn closes(open: &Fence, line: &str) -> bool {
    match parse_fence(line) {
        Some(f) => f.ch == open.ch && f.len >= open.len && f.info.is_none(),
        None => false,
    }
}

fn push_block(blocks: &mut Vec<CommandBlock>, body: &[&str], lang: Option<String>) {
    let start = body.iter().position(|l| !l.trim().is_empty());
    let end = body.iter().rposition(|l| !l.trim().is_empty());
    let (Some(start), Some(end)) = (start, end) else {
        return; // empty or whitespace-only region
    };
    let text = body[start..=end].join("\n");
    let index = blocks.len() + 1;
    blocks.push(CommandBlock::new(index, text.trim_end(), lang));
}

/// Split a reply into its fenced command blocks, numbered densely from 1.
///
/// Never fails. Prose outside fences is ignored, empty fences are skipped
/// without consuming a number, and an unterminated fence swallows the
/// remainder of the text.
pub fn scan_blocks(text: &str) -> Extraction {
    let mut blocks = Vec::new();
    let mut open: Option<(Fence, usize)> = None;
    let mut body: Vec<&str> = Vec::new();

    for (number, line) in text.lines().enumerate() {
        match open.as_ref().map(|(fence, _)| closes(fence, line)) {
            None => {
                if let Some(fence) = parse_fence(line) {
                    open = Some((fence, number + 1));
                    body.clear();
                }
            }
            Some(true) => {
                if let Some((fence, _)) = open.take() {
                    push_block(&mut blocks, &body, fence.info);
                }
                body.clear();
            }
            Some(false) => body.push(line),
        }
    }

    let ambiguity = open.map(|(fence, line)| {
        push_block(&mut blocks, &body, fence.info);
        ParseAmbiguity::UnterminatedFence { line }
    });

    Extraction { blocks, ambiguity }
}

/// [`scan_blocks`] without the diagnostics.
pub fn extract_blocks(text: &str) -> Vec<CommandBlock> {
    scan_blocks(text).blocks
}
