use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DIRECT_CHANNEL_PREFIX, GENERAL_CHANNEL};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PrincipalId(pub Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel identifier.
///
/// Persistent channels carry a random UUID (or the literal `general`);
/// direct-message channels are derived from the sorted participant pair so
/// both sides always resolve to the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn general() -> Self {
        Self(GENERAL_CHANNEL.to_string())
    }

    pub fn direct(a: PrincipalId, b: PrincipalId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{DIRECT_CHANNEL_PREFIX}:{lo}:{hi}"))
    }

    pub fn is_direct(&self) -> bool {
        self.0
            .strip_prefix(DIRECT_CHANNEL_PREFIX)
            .is_some_and(|rest| rest.starts_with(':'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// An authenticated user or a guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: PrincipalId,
    pub display_name: String,
    /// Guests are removed when their last connection closes.
    pub is_ephemeral: bool,
    #[serde(default)]
    pub online: bool,
}

impl Principal {
    pub fn registered(display_name: impl Into<String>) -> Self {
        Self {
            id: PrincipalId::new(),
            display_name: display_name.into(),
            is_ephemeral: false,
            online: false,
        }
    }

    pub fn guest(display_name: impl Into<String>) -> Self {
        Self {
            is_ephemeral: true,
            ..Self::registered(display_name)
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    Persistent,
    DirectMessage,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Persistent => "persistent",
            ChannelKind::DirectMessage => "directMessage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "persistent" => Some(ChannelKind::Persistent),
            "directMessage" => Some(ChannelKind::DirectMessage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub kind: ChannelKind,
    pub member_ids: Vec<PrincipalId>,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn persistent(name: impl Into<String>) -> Self {
        Self {
            id: ChannelId::new(),
            name: name.into(),
            kind: ChannelKind::Persistent,
            member_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn general() -> Self {
        Self {
            id: ChannelId::general(),
            ..Self::persistent(GENERAL_CHANNEL)
        }
    }

    pub fn direct(a: &Principal, b: &Principal) -> Self {
        Self {
            id: ChannelId::direct(a.id, b.id),
            name: format!("{}, {}", a.display_name, b.display_name),
            kind: ChannelKind::DirectMessage,
            member_ids: vec![a.id, b.id],
            created_at: Utc::now(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.kind == ChannelKind::Persistent
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An uploaded file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRef {
    pub url: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub name: String,
}

/// A stored chat message. Text and file are immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: PrincipalId,
    /// Display name at send time; survives removal of guest principals.
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
}

/// A single `(message, principal, emoji)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reaction {
    pub message_id: MessageId,
    pub principal_id: PrincipalId,
    pub emoji: String,
}

/// Broadcast view of a message's reactions: emoji to reacting principals.
pub type ReactionAggregate = BTreeMap<String, Vec<PrincipalId>>;

/// A message as delivered to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub reactions: ReactionAggregate,
    pub reply_count: usize,
}

// ---------------------------------------------------------------------------
// Assistant
// ---------------------------------------------------------------------------

/// A snippet of chat history the assistant based its answer on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_channel_id_is_symmetric() {
        let a = PrincipalId::new();
        let b = PrincipalId::new();
        assert_eq!(ChannelId::direct(a, b), ChannelId::direct(b, a));
        assert!(ChannelId::direct(a, b).is_direct());
        assert!(!ChannelId::general().is_direct());
        assert!(!ChannelId("dmz".into()).is_direct());
    }

    #[test]
    fn message_view_flattens_message_fields() {
        let view = MessageView {
            message: Message {
                id: MessageId::new(),
                channel_id: ChannelId::general(),
                author_id: PrincipalId::new(),
                author_name: "ana".into(),
                text: "hi".into(),
                created_at: Utc::now(),
                file: None,
                parent_id: None,
            },
            reactions: ReactionAggregate::new(),
            reply_count: 2,
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["channelId"], "general");
        assert_eq!(json["authorName"], "ana");
        assert_eq!(json["replyCount"], 2);
        assert!(json.get("parentId").is_none());
    }
}
