//! Realtime wire protocol.
//!
//! Frames are JSON objects tagged by `type` (kebab-case) with camelCase
//! fields, e.g. `{"type":"send-message","channelId":"general","text":"hi"}`.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorKind};
use crate::types::{
    Channel, ChannelId, FileRef, MessageId, MessageView, Principal, PrincipalId,
    ReactionAggregate,
};

/// Events sent by a client over an authenticated connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    SendMessage {
        channel_id: ChannelId,
        #[serde(default)]
        text: String,
        #[serde(default)]
        parent_id: Option<MessageId>,
        #[serde(default)]
        file_ref: Option<FileRef>,
    },
    ToggleReaction {
        message_id: MessageId,
        emoji: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    JoinChannel {
        channel_id: ChannelId,
    },
    GetThread {
        parent_id: MessageId,
    },
    CloseThread {
        parent_id: MessageId,
    },
    CreateChannel {
        name: String,
    },
    OpenDirect {
        principal_id: PrincipalId,
    },
}

/// Events pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Initialize {
        channels: Vec<Channel>,
        current_principal: Principal,
        online_users: Vec<Principal>,
        recent_messages: Vec<MessageView>,
    },
    MessageCreated {
        channel_id: ChannelId,
        message: MessageView,
    },
    ThreadUpdated {
        parent_id: MessageId,
        reply_count: usize,
        latest_reply: Option<MessageView>,
    },
    Thread {
        parent: MessageView,
        replies: Vec<MessageView>,
    },
    ThreadClosed {
        parent_id: MessageId,
    },
    ReactionUpdated {
        message_id: MessageId,
        aggregate: ReactionAggregate,
    },
    MessageDeleted {
        message_id: MessageId,
        channel_id: ChannelId,
        parent_id: Option<MessageId>,
    },
    ChannelHistory {
        channel_id: ChannelId,
        messages: Vec<MessageView>,
    },
    PresenceChanged {
        principal_id: PrincipalId,
        online: bool,
    },
    ChannelCreated {
        channel: Channel,
    },
    Error {
        scope: ErrorScope,
        kind: ErrorKind,
        message: String,
    },
}

/// Error events only ever go to the connection that caused them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    Sender,
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::SendMessage { .. } => "send-message",
            ClientEvent::ToggleReaction { .. } => "toggle-reaction",
            ClientEvent::DeleteMessage { .. } => "delete-message",
            ClientEvent::JoinChannel { .. } => "join-channel",
            ClientEvent::GetThread { .. } => "get-thread",
            ClientEvent::CloseThread { .. } => "close-thread",
            ClientEvent::CreateChannel { .. } => "create-channel",
            ClientEvent::OpenDirect { .. } => "open-direct",
        }
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(err: &ChatError) -> Self {
        ServerEvent::Error {
            scope: ErrorScope::Sender,
            kind: err.kind(),
            message: err.client_message(),
        }
    }
}
