use shellchat_core::{ExecutionResult, ResultKey, TurnId};
use shellchat_transport::redact_secrets;

const TRUNCATED_MARKER: &str = "[output truncated]";

/// Build the message that shares a batch of results with the assistant.
/// Blocks outside `current_set` are labelled with their turn.
pub fn format_share_payload(
    context: Option<&str>,
    outputs: &[(ResultKey, ExecutionResult)],
    current_set: Option<TurnId>,
    redact: bool,
) -> String {
    let sections: Vec<String> = outputs
        .iter()
        .map(|(key, result)| {
            let label = if Some(key.turn_id) == current_set {
                format!("Output from block {}", key.block_index)
            } else {
                format!("Output from block {} of turn {}", key.block_index, key.turn_id)
            };
            format_section(&label, result)
        })
        .collect();
    let mut message = format!(
        "Here is the output from my commands:\n\n{}",
        sections.join("\n\n")
    );
    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        message = format!("{context}\n\n{message}");
    }
    if redact {
        redact_secrets(&message)
    } else {
        message
    }
}

/// History text for a command the user ran directly with `!bash`.
pub fn format_command_record(command: &str, result: &ExecutionResult, redact: bool) -> String {
    let record = format!("!bash {command}\n\n{}", format_section("Output", result));
    if redact {
        redact_secrets(&record)
    } else {
        record
    }
}

fn format_section(label: &str, result: &ExecutionResult) -> String {
    let status = if result.interrupted {
        format!("exit {}, {}", result.exit_code, result.status_label())
    } else {
        result.status_label()
    };
    let mut out = format!(
        "{label} ({status}):\n```\n{}\n```",
        result.stdout.trim_end_matches('\n')
    );
    if result.stdout_truncated {
        out.push('\n');
        out.push_str(TRUNCATED_MARKER);
    }
    if !result.stderr.is_empty() {
        out.push_str(&format!(
            "\nstderr:\n```\n{}\n```",
            result.stderr.trim_end_matches('\n')
        ));
        if result.stderr_truncated {
            out.push('\n');
            out.push_str(TRUNCATED_MARKER);
        }
    }
    out
}
