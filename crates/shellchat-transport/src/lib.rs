pub mod anthropic;
pub mod error;
pub mod prompt;
pub mod redact;
pub mod usage;

pub use anthropic::{AnthropicTransport, TransportConfig};
pub use error::TransportError;
pub use prompt::system_prompt;
pub use redact::redact_secrets;
pub use usage::TokenUsage;

use shellchat_core::Role;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One prior message of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A request to the assistant: prior history plus the new user message.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub system_prompt: String,
    pub history: Vec<HistoryMessage>,
    pub message: String,
}

/// The assistant's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Input plus output tokens billed for this exchange.
    pub tokens: u64,
}

/// Sends one message to the assistant and waits for the reply.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Outbound) -> Result<Reply, TransportError>;
}

// ── Mock ──

enum MockReply {
    Reply(Reply),
    Failure(String),
    Pending,
}

/// Mock transport for testing. Pops replies in order and records every
/// request it receives; with nothing queued it answers with an empty reply.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    sent: Mutex<Vec<Outbound>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.replies.lock().unwrap().push_back(MockReply::Reply(Reply {
            text: text.into(),
            tokens: 10,
        }));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Failure(message.into()));
    }

    /// The next request never gets an answer.
    pub fn push_pending(&self) {
        self.replies.lock().unwrap().push_back(MockReply::Pending);
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Outbound) -> Result<Reply, TransportError> {
        self.sent.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(MockReply::Reply(reply)) => Ok(reply),
            Some(MockReply::Failure(msg)) => Err(TransportError::Http(msg)),
            Some(MockReply::Pending) => std::future::pending().await,
            None => Ok(Reply {
                text: String::new(),
                tokens: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(message: &str) -> Outbound {
        Outbound {
            system_prompt: "sys".into(),
            history: vec![],
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn mock_replays_queue_and_records() {
        let mock = MockTransport::new();
        mock.push_reply("first");
        mock.push_failure("boom");

        assert_eq!(mock.send(&outbound("a")).await.unwrap().text, "first");
        assert!(matches!(
            mock.send(&outbound("b")).await,
            Err(TransportError::Http(_))
        ));
        assert_eq!(mock.send(&outbound("c")).await.unwrap().text, "");
        let sent: Vec<String> = mock.sent().into_iter().map(|o| o.message).collect();
        assert_eq!(sent, vec!["a", "b", "c"]);
    }
}
