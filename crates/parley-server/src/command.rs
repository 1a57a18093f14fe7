//! Inbound events classified into router commands.
//!
//! Whether a message goes to the assistant is decided here, once, from the
//! configured text prefix.

use parley_shared::error::Result;
use parley_shared::protocol::ClientEvent;
use parley_shared::{ChannelId, ChatError, FileRef, MessageId, PrincipalId};

/// A message as submitted by a client, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub channel_id: ChannelId,
    pub text: String,
    pub parent_id: Option<MessageId>,
    pub file: Option<FileRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PlainSend(Draft),
    /// The draft is stored and broadcast like a plain message; `query` is
    /// the text after the prefix.
    AssistantSend { draft: Draft, query: String },
    ToggleReaction { message_id: MessageId, emoji: String },
    DeleteMessage { message_id: MessageId },
    JoinChannel { channel_id: ChannelId },
    GetThread { parent_id: MessageId },
    CloseThread { parent_id: MessageId },
    CreateChannel { name: String },
    OpenDirect { principal_id: PrincipalId },
}

impl Command {
    pub fn classify(event: ClientEvent, assistant_prefix: &str) -> Result<Self> {
        let command = match event {
            ClientEvent::SendMessage {
                channel_id,
                text,
                parent_id,
                file_ref,
            } => {
                let query = text
                    .strip_prefix(assistant_prefix)
                    .map(|q| q.trim().to_string());
                let draft = Draft {
                    channel_id,
                    text,
                    parent_id,
                    file: file_ref,
                };
                match query {
                    Some(query) if query.is_empty() => {
                        return Err(ChatError::Validation("assistant query is empty".into()));
                    }
                    Some(query) => Command::AssistantSend { draft, query },
                    None => Command::PlainSend(draft),
                }
            }
            ClientEvent::ToggleReaction { message_id, emoji } => {
                Command::ToggleReaction { message_id, emoji }
            }
            ClientEvent::DeleteMessage { message_id } => Command::DeleteMessage { message_id },
            ClientEvent::JoinChannel { channel_id } => Command::JoinChannel { channel_id },
            ClientEvent::GetThread { parent_id } => Command::GetThread { parent_id },
            ClientEvent::CloseThread { parent_id } => Command::CloseThread { parent_id },
            ClientEvent::CreateChannel { name } => Command::CreateChannel { name },
            ClientEvent::OpenDirect { principal_id } => Command::OpenDirect { principal_id },
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(text: &str) -> ClientEvent {
        ClientEvent::SendMessage {
            channel_id: ChannelId::general(),
            text: text.into(),
            parent_id: None,
            file_ref: None,
        }
    }

    #[test]
    fn plain_text_is_a_plain_send() {
        let command = Command::classify(send("hello"), "/askAI ").unwrap();
        assert!(matches!(command, Command::PlainSend(d) if d.text == "hello"));
    }

    #[test]
    fn prefixed_text_goes_to_the_assistant() {
        match Command::classify(send("/askAI  What is X? "), "/askAI ").unwrap() {
            Command::AssistantSend { draft, query } => {
                assert_eq!(query, "What is X?");
                assert_eq!(draft.text, "/askAI  What is X? ");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn prefix_is_configurable_and_exact() {
        assert!(matches!(
            Command::classify(send("/askAI hi"), "!ai ").unwrap(),
            Command::PlainSend(_)
        ));
        assert!(matches!(
            Command::classify(send("!ai hi"), "!ai ").unwrap(),
            Command::AssistantSend { .. }
        ));
        assert!(matches!(
            Command::classify(send("/askAIhi"), "/askAI ").unwrap(),
            Command::PlainSend(_)
        ));
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(matches!(
            Command::classify(send("/askAI    "), "/askAI "),
            Err(ChatError::Validation(_))
        ));
    }
}
