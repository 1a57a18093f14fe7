//! The message router.
//!
//! One task owns the connection hub, presence and thread observers and
//! processes [`RouterEvent`]s strictly one at a time, so each inbound event
//! is atomic with respect to shared state and its broadcasts reach every
//! outbox consecutively. Assistant calls run on detached tasks and report
//! back through the same queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use parley_shared::error::Result;
use parley_shared::protocol::{ClientEvent, ServerEvent};
use parley_shared::{
    Answer, ChannelId, ChatError, ErrorKind, Message, MessageId, Principal, PrincipalId,
};
use parley_store::{Store, StoreError};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::assistant::{format_answer, Assistant};
use crate::command::{Command, Draft};
use crate::hub::{ConnectionId, Hub, Outbox};
use crate::membership;
use crate::messages;
use crate::presence::PresenceTracker;
use crate::reactions;
use crate::threads::ThreadEngine;

/// Store handle shared by the router and the HTTP handlers.
pub type SharedStore = Arc<Mutex<Box<dyn Store>>>;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub assistant_prefix: String,
    /// Root messages sent with `initialize` and `channel-history`.
    pub history_limit: usize,
}

pub enum RouterEvent {
    Connect {
        conn: ConnectionId,
        principal: Principal,
        outbox: Outbox,
    },
    Inbound {
        conn: ConnectionId,
        event: ClientEvent,
    },
    /// A frame that never became an event (malformed JSON, rate limited).
    Reject {
        conn: ConnectionId,
        error: ChatError,
    },
    Disconnect {
        conn: ConnectionId,
    },
    AssistantCompleted {
        conn: ConnectionId,
        author: Principal,
        question: MessageId,
        result: Result<Answer>,
    },
    /// Remove guests created at or before the cutoff that are not online.
    PurgeGuests {
        created_before: DateTime<Utc>,
    },
}

/// Cloneable entry point used by connection tasks.
#[derive(Clone)]
pub struct RouterHandle {
    events: mpsc::UnboundedSender<RouterEvent>,
    next_conn: Arc<AtomicU64>,
}

impl RouterHandle {
    /// Register a new authenticated connection and return its outbox.
    pub fn connect(&self, principal: Principal) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (outbox, rx) = mpsc::unbounded_channel();
        self.dispatch(RouterEvent::Connect {
            conn,
            principal,
            outbox,
        });
        (conn, rx)
    }

    pub fn inbound(&self, conn: ConnectionId, event: ClientEvent) {
        self.dispatch(RouterEvent::Inbound { conn, event });
    }

    pub fn reject(&self, conn: ConnectionId, error: ChatError) {
        self.dispatch(RouterEvent::Reject { conn, error });
    }

    pub fn disconnect(&self, conn: ConnectionId) {
        self.dispatch(RouterEvent::Disconnect { conn });
    }

    /// Remove offline guests older than `max_age`.
    pub fn purge_guests(&self, max_age: Duration) {
        let Some(created_before) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            warn!(?max_age, "Guest age out of range, skipping purge");
            return;
        };
        self.dispatch(RouterEvent::PurgeGuests { created_before });
    }

    fn dispatch(&self, event: RouterEvent) {
        if self.events.send(event).is_err() {
            warn!("Router task stopped, dropping event");
        }
    }
}

/// Start the router task.
pub fn spawn_router(
    store: SharedStore,
    assistant: Arc<dyn Assistant>,
    config: RouterConfig,
) -> RouterHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router {
        store,
        assistant,
        config,
        hub: Hub::new(),
        presence: PresenceTracker::new(),
        threads: ThreadEngine::new(),
        events: tx.downgrade(),
    };
    tokio::spawn(router.run(rx));
    RouterHandle {
        events: tx,
        next_conn: Arc::new(AtomicU64::new(1)),
    }
}

struct Router {
    store: SharedStore,
    assistant: Arc<dyn Assistant>,
    config: RouterConfig,
    hub: Hub,
    presence: PresenceTracker,
    threads: ThreadEngine,
    /// Weak so the router stops once every handle is dropped.
    events: mpsc::WeakUnboundedSender<RouterEvent>,
}

impl Router {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RouterEvent>) {
        info!("Router started");
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        info!("Router stopped");
    }

    async fn handle(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Connect {
                conn,
                principal,
                outbox,
            } => {
                if let Err(e) = self.on_connect(conn, principal, outbox.clone()).await {
                    // The connection is not registered; answer on the outbox
                    // directly and drop it so the socket closes.
                    log_failure(conn, "connect", &e);
                    let _ = outbox.send(ServerEvent::error(&e));
                }
            }
            RouterEvent::Inbound { conn, event } => {
                let name = event.name();
                if let Err(e) = self.on_inbound(conn, event).await {
                    self.fail(conn, name, e);
                }
            }
            RouterEvent::Reject { conn, error } => self.fail(conn, "frame", error),
            RouterEvent::Disconnect { conn } => {
                if let Err(e) = self.on_disconnect(conn).await {
                    error!(conn, error = %e, "Disconnect cleanup failed");
                }
            }
            RouterEvent::AssistantCompleted {
                conn,
                author,
                question,
                result,
            } => {
                if let Err(e) = self.on_assistant_completed(&author, question, result).await {
                    self.fail(conn, "assistant", e);
                }
            }
            RouterEvent::PurgeGuests { created_before } => {
                if let Err(e) = self.purge_guests(created_before).await {
                    error!(error = %e, "Guest purge failed");
                }
            }
        }
    }

    /// Log a failed operation and report it to the originating connection.
    fn fail(&self, conn: ConnectionId, op: &str, err: ChatError) {
        log_failure(conn, op, &err);
        self.hub.send(conn, ServerEvent::error(&err));
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    async fn on_connect(
        &mut self,
        conn: ConnectionId,
        principal: Principal,
        outbox: Outbox,
    ) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut guard = store.lock().await;
        let store: &mut dyn Store = &mut **guard;

        // The token may outlive the principal (a guest removed on its last
        // disconnect, or purged).
        match store.get_principal(principal.id) {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(ChatError::Authentication(
                    "principal no longer exists".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        // Announce before registering so the newcomer learns presence from
        // `initialize` rather than from its own broadcast.
        self.presence.mark_online(principal.id, &self.hub);
        self.hub.register(conn, principal.clone(), outbox);

        match self.initialize(store, conn, principal) {
            Ok(initialize) => {
                self.hub.send(conn, initialize);
                Ok(())
            }
            Err(e) => {
                if let Some(principal) = self.hub.unregister(conn) {
                    self.presence.mark_offline(principal.id, &self.hub);
                }
                Err(e)
            }
        }
    }

    /// Subscribe a freshly registered connection and build its snapshot.
    fn initialize(
        &mut self,
        store: &mut dyn Store,
        conn: ConnectionId,
        principal: Principal,
    ) -> Result<ServerEvent> {
        membership::join_all(store, &mut self.hub, conn, principal.id)?;
        let channels = membership::list_visible_channels(store, principal.id)?;
        let online_users = store
            .list_principals()?
            .into_iter()
            .filter(|p| self.presence.is_online(p.id))
            .map(|p| Principal { online: true, ..p })
            .collect();
        let recent_messages =
            messages::recent(store, &ChannelId::general(), self.config.history_limit)?;

        info!(conn, principal = %principal.id, name = %principal.display_name, "Connection joined");
        Ok(ServerEvent::Initialize {
            channels,
            current_principal: Principal {
                online: true,
                ..principal
            },
            online_users,
            recent_messages,
        })
    }

    async fn on_disconnect(&mut self, conn: ConnectionId) -> Result<()> {
        let Some(principal) = self.hub.unregister(conn) else {
            return Ok(());
        };
        self.threads.forget_connection(conn);
        info!(conn, principal = %principal.id, "Connection left");

        if self.presence.mark_offline(principal.id, &self.hub) && principal.is_ephemeral {
            let mut store = self.store.lock().await;
            if store.remove_principal(principal.id)? {
                info!(principal = %principal.id, name = %principal.display_name, "Removed guest");
            }
        }
        Ok(())
    }

    async fn purge_guests(&mut self, created_before: DateTime<Utc>) -> Result<()> {
        let mut store = self.store.lock().await;
        let mut removed = 0usize;
        for id in store.stale_guests(created_before)? {
            if !self.presence.is_online(id) && store.remove_principal(id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Purged idle guests");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------

    async fn on_inbound(&mut self, conn: ConnectionId, event: ClientEvent) -> Result<()> {
        let principal = self
            .hub
            .principal_of(conn)
            .cloned()
            .ok_or_else(|| ChatError::Authentication("connection is not registered".into()))?;
        debug!(conn, event = event.name(), "Inbound event");

        match Command::classify(event, &self.config.assistant_prefix)? {
            Command::PlainSend(draft) => {
                self.send_message(&principal, draft).await?;
            }
            Command::AssistantSend { draft, query } => {
                let question = self.send_message(&principal, draft).await?;
                self.ask_assistant(conn, principal, question.id, query);
            }
            Command::ToggleReaction { message_id, emoji } => {
                self.toggle_reaction(principal.id, message_id, &emoji).await?;
            }
            Command::DeleteMessage { message_id } => {
                self.delete_message(principal.id, message_id).await?;
            }
            Command::JoinChannel { channel_id } => {
                self.join_channel(conn, principal.id, &channel_id).await?;
            }
            Command::GetThread { parent_id } => {
                self.get_thread(conn, principal.id, parent_id).await?;
            }
            Command::CloseThread { parent_id } => self.threads.close(parent_id, conn),
            Command::CreateChannel { name } => {
                self.create_channel(principal.id, &name).await?;
            }
            Command::OpenDirect { principal_id } => {
                self.open_direct(conn, &principal, principal_id).await?;
            }
        }
        Ok(())
    }

    /// Authorise, validate, store and broadcast one message.
    async fn send_message(&mut self, author: &Principal, draft: Draft) -> Result<Message> {
        let store = Arc::clone(&self.store);
        let mut guard = store.lock().await;
        let store: &mut dyn Store = &mut **guard;

        membership::authorize(store, author.id, &draft.channel_id)?;
        let (message, evicted) = match draft.parent_id {
            Some(parent) => self.threads.create_reply(
                store,
                &draft.channel_id,
                parent,
                author,
                &draft.text,
                draft.file,
            )?,
            None => {
                messages::create_root(store, &draft.channel_id, author, &draft.text, draft.file)?
            }
        };
        self.close_threads(&evicted);
        self.publish(store, &message)?;
        Ok(message)
    }

    /// Broadcast `message-created`, then `thread-updated` for replies.
    fn publish(&self, store: &dyn Store, message: &Message) -> Result<()> {
        let view = messages::view(store, message.clone())?;
        let reached = self.hub.broadcast_channel(
            &message.channel_id,
            &ServerEvent::MessageCreated {
                channel_id: message.channel_id.clone(),
                message: view,
            },
        );
        debug!(message = %message.id, channel = %message.channel_id, reached, "Message created");

        if let Some(parent) = message.parent_id {
            let update = self.threads.update_event(store, parent)?;
            self.hub.broadcast_channel(&message.channel_id, &update);
        }
        Ok(())
    }

    fn ask_assistant(
        &self,
        conn: ConnectionId,
        author: Principal,
        question: MessageId,
        query: String,
    ) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let assistant = Arc::clone(&self.assistant);
        debug!(conn, question = %question, "Dispatching assistant query");
        tokio::spawn(async move {
            let result = assistant.answer(&query).await;
            // The router only goes away at shutdown; nothing to report to.
            let _ = events.send(RouterEvent::AssistantCompleted {
                conn,
                author,
                question,
                result,
            });
        });
    }

    async fn on_assistant_completed(
        &mut self,
        author: &Principal,
        question: MessageId,
        result: Result<Answer>,
    ) -> Result<()> {
        let answer = result?;

        let store = Arc::clone(&self.store);
        let mut guard = store.lock().await;
        let store: &mut dyn Store = &mut **guard;

        let question = match store.get_message(question) {
            Ok(question) => question,
            Err(StoreError::NotFound(_)) => {
                return Err(ChatError::NotFound(
                    "question was deleted before the assistant answered".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let reply = messages::compose(
            &question.channel_id,
            author,
            &format_answer(&answer),
            None,
            Some(question.id),
        );
        let evicted = store.create_message(&reply)?;
        self.close_threads(&evicted);
        info!(question = %question.id, answer = %reply.id, "Assistant answered");
        self.publish(store, &reply)
    }

    async fn toggle_reaction(
        &mut self,
        principal: PrincipalId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut guard = store.lock().await;
        let store: &mut dyn Store = &mut **guard;

        let message = store.get_message(message_id)?;
        membership::authorize(store, principal, &message.channel_id)?;
        let aggregate = reactions::toggle(store, message_id, principal, emoji)?;
        self.hub.broadcast_channel(
            &message.channel_id,
            &ServerEvent::ReactionUpdated {
                message_id,
                aggregate,
            },
        );
        Ok(())
    }

    async fn delete_message(&mut self, principal: PrincipalId, message_id: MessageId) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut guard = store.lock().await;
        let store: &mut dyn Store = &mut **guard;

        let message = store.get_message(message_id)?;
        if message.author_id != principal {
            return Err(ChatError::Authorization(
                "only the author may delete a message".into(),
            ));
        }
        let removed = store.delete_message(message_id)?;

        self.close_threads(&removed);
        self.hub.broadcast_channel(
            &message.channel_id,
            &ServerEvent::MessageDeleted {
                message_id,
                channel_id: message.channel_id.clone(),
                parent_id: message.parent_id,
            },
        );
        if let Some(parent) = message.parent_id {
            let update = self.threads.update_event(store, parent)?;
            self.hub.broadcast_channel(&message.channel_id, &update);
        }
        info!(message = %message_id, removed = removed.len(), "Message deleted");
        Ok(())
    }

    /// Tell observers of removed messages that their thread is gone.
    fn close_threads(&mut self, removed: &[MessageId]) {
        for (parent_id, observers) in self.threads.take_observers(removed) {
            for conn in observers {
                self.hub.send(conn, ServerEvent::ThreadClosed { parent_id });
            }
        }
    }

    async fn join_channel(
        &mut self,
        conn: ConnectionId,
        principal: PrincipalId,
        channel_id: &ChannelId,
    ) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut guard = store.lock().await;
        let store: &mut dyn Store = &mut **guard;

        let channel = membership::join_channel(store, &mut self.hub, conn, principal, channel_id)?;
        let messages = messages::recent(store, &channel.id, self.config.history_limit)?;
        self.hub.send(
            conn,
            ServerEvent::ChannelHistory {
                channel_id: channel.id,
                messages,
            },
        );
        Ok(())
    }

    async fn get_thread(
        &mut self,
        conn: ConnectionId,
        principal: PrincipalId,
        parent_id: MessageId,
    ) -> Result<()> {
        let store = Arc::clone(&self.store);
        let guard = store.lock().await;
        let store: &dyn Store = &**guard;

        let parent = store.get_message(parent_id)?;
        membership::authorize(store, principal, &parent.channel_id)?;
        let (parent, replies) = self.threads.get_thread(store, parent_id)?;
        self.threads.observe(parent_id, conn);
        self.hub.send(conn, ServerEvent::Thread { parent, replies });
        Ok(())
    }

    async fn create_channel(&mut self, creator: PrincipalId, name: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut guard = store.lock().await;

        let channel = membership::create_channel(&mut **guard, &mut self.hub, creator, name)?;
        self.hub.broadcast_all(&ServerEvent::ChannelCreated { channel });
        Ok(())
    }

    async fn open_direct(
        &mut self,
        conn: ConnectionId,
        requester: &Principal,
        target: PrincipalId,
    ) -> Result<()> {
        let store = Arc::clone(&self.store);
        let mut guard = store.lock().await;
        membership::open_direct(&mut **guard, &mut self.hub, conn, requester, target)?;
        Ok(())
    }
}

fn log_failure(conn: ConnectionId, op: &str, err: &ChatError) {
    if err.kind() == ErrorKind::Internal {
        error!(conn, op, error = %err, "Operation failed");
    } else {
        warn!(conn, op, error = %err, "Operation rejected");
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
