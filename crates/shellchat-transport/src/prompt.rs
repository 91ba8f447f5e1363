use std::path::Path;

/// System prompt sent with every request.
pub fn system_prompt(cwd: &Path) -> String {
    format!(
        "You are a Linux shell assistant alongside an active bash prompt. \
Help users write and understand shell commands and scripts.

Key points:
- Always use ```bash code blocks for commands
- Each command block should be self-contained and executable
- Explain what commands do before or after the code blocks
- Multiple command blocks are fine - users can select which to run

The user runs suggested blocks with `!run <n | all | select>`.
They can then share the output with you using `!share`.

Current context:
Directory: {}",
        cwd.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_mentions_commands_and_cwd() {
        let prompt = system_prompt(Path::new("/srv/project"));
        assert!(prompt.contains("```bash"));
        assert!(prompt.contains("!run"));
        assert!(prompt.contains("!share"));
        assert!(prompt.ends_with("Directory: /srv/project"));
    }
}
