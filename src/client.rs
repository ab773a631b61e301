use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::session::{ConversationSession, PreviewHandle};
use anyhow::Result;
use dashmap::DashMap;
use log::{debug, info};
use rand::RngCore;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use stitchcore::net::{HttpClient, Transport, TransportEvent, TransportFactory};
use stitchcore::types::{Message, Participants};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// The conversation engine.
///
/// Owns one active [`ConversationSession`] at a time and reconciles the
/// three racing inputs — history fetch, optimistic local sends, and live
/// transport events — into that session's store. The transport and the
/// HTTP stack are injected at construction; the engine never creates
/// connections on its own.
pub struct ChatClient {
    pub(crate) config: ClientConfig,
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) session: Mutex<Option<ConversationSession>>,
    /// Bumped on every conversation open/close. In-flight continuations
    /// carry the value they started under and drop themselves when it no
    /// longer matches.
    pub(crate) session_generation: AtomicU64,
    /// Outstanding local preview handles, keyed by client message id.
    pub(crate) previews: DashMap<String, Arc<PreviewHandle>>,
    unique_id: String,
    id_counter: AtomicU64,
    typing_emitted: AtomicBool,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        http: Arc<dyn HttpClient>,
    ) -> Arc<Self> {
        let mut random_bytes = [0u8; 4];
        rand::rng().fill_bytes(&mut random_bytes);
        Arc::new(Self {
            config,
            http,
            transport,
            session: Mutex::new(None),
            session_generation: AtomicU64::new(0),
            previews: DashMap::new(),
            unique_id: hex::encode(random_bytes),
            id_counter: AtomicU64::new(0),
            typing_emitted: AtomicBool::new(false),
        })
    }

    /// Creates the transport through `factory`, builds the client around
    /// it, and spawns the inbound event loop.
    pub async fn connect(
        config: ClientConfig,
        factory: &dyn TransportFactory,
        http: Arc<dyn HttpClient>,
    ) -> Result<Arc<Self>> {
        let (transport, events) = factory.create_transport().await?;
        let client = Self::new(config, transport, http);
        client.spawn_event_loop(events);
        Ok(client)
    }

    /// Drains the transport's event stream into the dispatcher until the
    /// stream closes.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                client.dispatch_transport_event(event).await;
            }
            debug!("transport event stream closed");
        })
    }

    /// Mints a new correlation key for a locally-originated message.
    pub fn generate_client_message_id(&self) -> String {
        let count = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.unique_id, count)
    }

    /// Opens a conversation, tearing down whatever was open before, and
    /// pulls its message history. Late continuations belonging to the
    /// previous conversation are invalidated by the generation bump.
    pub async fn open_conversation(
        self: &Arc<Self>,
        conversation_id: impl Into<String>,
        participants: Participants,
    ) -> Result<(), ClientError> {
        let conversation_id = conversation_id.into();
        let generation = self.session_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.release_all_previews();
        {
            let mut guard = self.session.lock().await;
            if let Some(mut old) = guard.take() {
                old.cache.clear();
                info!("closed conversation {}", old.conversation_id);
            }
            *guard = Some(ConversationSession::new(
                conversation_id.clone(),
                participants,
                generation,
                &self.config,
            ));
        }
        info!("opened conversation {conversation_id}");
        self.refresh_history().await?;
        Ok(())
    }

    /// Ends the active session: evicts its optimistic cache and releases
    /// any preview handle that is still outstanding.
    pub async fn close_conversation(&self) {
        self.session_generation.fetch_add(1, Ordering::SeqCst);
        self.release_all_previews();
        let mut guard = self.session.lock().await;
        if let Some(mut old) = guard.take() {
            old.cache.clear();
            info!("closed conversation {}", old.conversation_id);
        }
    }

    /// Emits this user's own typing state. Deduplicated against the last
    /// emitted value so key-repeat does not flood the transport.
    pub async fn set_typing(&self, is_typing: bool) -> Result<(), ClientError> {
        if self.typing_emitted.swap(is_typing, Ordering::Relaxed) == is_typing {
            return Ok(());
        }
        let conversation_id = {
            let guard = self.session.lock().await;
            guard
                .as_ref()
                .map(|s| s.conversation_id.clone())
                .ok_or(ClientError::NoActiveConversation)?
        };
        self.transport
            .emit(
                "typing",
                json!({
                    "conversationId": conversation_id,
                    "senderId": self.config.own_participant_id,
                    "isTyping": is_typing,
                }),
            )
            .await?;
        Ok(())
    }

    /// Snapshot of the reconciled, time-ordered message sequence.
    pub async fn messages(&self) -> Vec<Message> {
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|s| s.store.messages().to_vec())
            .unwrap_or_default()
    }

    /// Participants currently showing a live typing indicator.
    pub async fn typing_participants(&self) -> Vec<String> {
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|s| s.typing.active(crate::handlers::typing_now()))
            .unwrap_or_default()
    }

    pub async fn conversation_id(&self) -> Option<String> {
        let guard = self.session.lock().await;
        guard.as_ref().map(|s| s.conversation_id.clone())
    }

    /// Local preview URL for an uploading image message, if one is still
    /// outstanding.
    pub fn preview_url(&self, client_message_id: &str) -> Option<String> {
        self.previews
            .get(client_message_id)
            .map(|entry| entry.url().to_string())
    }

    pub fn outstanding_previews(&self) -> usize {
        self.previews.len()
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.session_generation.load(Ordering::SeqCst)
    }

    pub(crate) fn release_all_previews(&self) {
        let keys: Vec<String> = self.previews.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.previews.remove(&key) {
                handle.release();
            }
        }
    }
}
