//! Inbound transport event dispatch.
//!
//! Every mutation of the active session triggered by the live transport
//! funnels through here, one event at a time, so the store is never
//! touched from two logical call sites in the same tick.

use crate::client::ChatClient;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use stitchcore::net::TransportEvent;
use stitchcore::normalize::{NormalizeContext, normalize, wire_time};
use stitchcore::types::MessageStatus;

impl ChatClient {
    pub(crate) async fn dispatch_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => info!("transport connected"),
            TransportEvent::Disconnected => warn!("transport disconnected"),
            TransportEvent::Error(err) => warn!("transport error: {err}"),
            TransportEvent::MessageAck(raw) => self.handle_message_ack(raw).await,
            TransportEvent::NewMessage(raw) => self.handle_new_message(raw).await,
            TransportEvent::Typing(raw) => self.handle_typing(raw).await,
            TransportEvent::Receipt(raw) => self.handle_receipt(raw).await,
        }
    }

    async fn handle_message_ack(&self, raw: Value) {
        let Some(client_message_id) = first_string(
            &raw,
            &["clientMessageId", "client_message_id", "clientId", "tempId"],
        ) else {
            warn!("ack without clientMessageId, ignoring: {raw}");
            return;
        };
        let Some(server_id) = first_string(&raw, &["id", "serverId", "messageId", "_id"]) else {
            warn!("ack without server id, ignoring: {raw}");
            return;
        };
        let server_time = wire_time(&raw);

        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            debug!("ack {server_id} with no active conversation, dropping");
            return;
        };
        session
            .store
            .ack_update(&client_message_id, &server_id, server_time);
        session.cache.supersede(&client_message_id);
    }

    async fn handle_new_message(&self, raw: Value) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            debug!("broadcast with no active conversation, dropping");
            return;
        };

        let ctx = NormalizeContext {
            participants: &session.participants,
            fallback_role: self.config.fallback_role,
            cache: Some(&session.cache),
        };
        let msg = normalize(&raw, &ctx);

        let confirmed = msg.id.is_some();
        let client_message_id = msg.client_message_id.clone();
        session.store.insert_or_merge(msg);
        if confirmed {
            if let Some(cmid) = client_message_id {
                session.cache.supersede(&cmid);
            }
        }
    }

    async fn handle_typing(self: &Arc<Self>, raw: Value) {
        let Some(sender) = first_string(&raw, &["sender", "senderId", "sender_id", "participant"])
            .or_else(|| {
                raw.get("sender")
                    .and_then(Value::as_object)
                    .and_then(|obj| obj.get("_id").or_else(|| obj.get("id")))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
        else {
            debug!("typing signal without sender, ignoring");
            return;
        };
        let is_typing = raw
            .get("isTyping")
            .or_else(|| raw.get("is_typing"))
            .or_else(|| raw.get("typing"))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let window = {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return;
            };
            session.typing.note(&sender, is_typing, typing_now());
            session.typing.window()
        };

        if is_typing {
            // Flip the entry back once the window lapses with no follow-up.
            let client = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let mut guard = client.session.lock().await;
                if let Some(session) = guard.as_mut() {
                    session.typing.sweep(typing_now());
                }
            });
        }
    }

    async fn handle_receipt(&self, raw: Value) {
        let Some(server_id) = first_string(&raw, &["id", "serverId", "messageId", "_id"]) else {
            debug!("receipt without message id, ignoring");
            return;
        };
        let Some(status) = first_string(&raw, &["status", "type", "receiptType"])
            .and_then(|token| MessageStatus::from_token(&token))
        else {
            debug!("receipt without a usable status, ignoring");
            return;
        };

        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            session.store.mark_receipt(&server_id, status);
        }
    }
}

/// Reads the tokio clock, so typing expiry also works under paused test
/// time.
pub(crate) fn typing_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = raw.get(*key).and_then(Value::as_str) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}
