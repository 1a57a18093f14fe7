//! Message creation and client views on top of [`Store`].

use chrono::Utc;
use parley_shared::constants::MAX_MESSAGE_LEN;
use parley_shared::error::Result;
use parley_shared::{
    ChannelId, ChatError, FileRef, Message, MessageId, MessageView, Principal,
};
use parley_store::Store;

use crate::reactions;

/// A message must carry non-blank text or a file.
pub fn validate_body(text: &str, file: Option<&FileRef>) -> Result<()> {
    if text.len() > MAX_MESSAGE_LEN {
        return Err(ChatError::Validation(format!(
            "message exceeds {MAX_MESSAGE_LEN} bytes"
        )));
    }
    if let Some(file) = file {
        if file.url.is_empty() || file.name.is_empty() || file.content_type.is_empty() {
            return Err(ChatError::Validation("incomplete file reference".into()));
        }
        return Ok(());
    }
    if text.trim().is_empty() {
        return Err(ChatError::Validation("message is empty".into()));
    }
    Ok(())
}

/// Build a message attributed to `author`, snapshotting the display name.
pub fn compose(
    channel: &ChannelId,
    author: &Principal,
    text: &str,
    file: Option<FileRef>,
    parent: Option<MessageId>,
) -> Message {
    Message {
        id: MessageId::new(),
        channel_id: channel.clone(),
        author_id: author.id,
        author_name: author.display_name.clone(),
        text: text.to_string(),
        created_at: Utc::now(),
        file,
        parent_id: parent,
    }
}

/// Persist a root message. Also returns the ids retention evicted to make
/// room for it.
pub fn create_root(
    store: &mut dyn Store,
    channel: &ChannelId,
    author: &Principal,
    text: &str,
    file: Option<FileRef>,
) -> Result<(Message, Vec<MessageId>)> {
    validate_body(text, file.as_ref())?;
    let message = compose(channel, author, text, file, None);
    let evicted = store.create_message(&message)?;
    Ok((message, evicted))
}

pub fn view(store: &dyn Store, message: Message) -> Result<MessageView> {
    let reactions = reactions::aggregate(&store.list_reactions(message.id)?);
    let reply_count = store.reply_count(message.id)?;
    Ok(MessageView {
        message,
        reactions,
        reply_count,
    })
}

pub fn views(store: &dyn Store, messages: Vec<Message>) -> Result<Vec<MessageView>> {
    messages.into_iter().map(|m| view(store, m)).collect()
}

/// The newest `limit` root messages of a channel as views, oldest first.
pub fn recent(store: &dyn Store, channel: &ChannelId, limit: usize) -> Result<Vec<MessageView>> {
    let messages = store.recent_messages(channel, limit)?;
    views(store, messages)
}
