//! The per-action send pipeline.
//!
//! Every locally-originated message follows the same shape: mint a
//! correlation key, put a pending entry in the store immediately so the
//! UI reflects the action with zero latency, snapshot the rich payload
//! into the optimistic cache, then hand the wire form to the transport.
//! Acknowledgements and failures arrive later and resolve against the
//! correlation key. There is no automatic retry; a failed message waits
//! for an explicit user retry.

use crate::client::ChatClient;
use crate::error::ClientError;
use chrono::{DateTime, Utc};
use log::warn;
use serde_json::{Map, Value, json};
use stitchcore::types::{
    DeliveryMeasurementPayload, Message, MessageKind, MessageStatus, Payload, UserPayload,
};

pub(crate) struct PendingEntry {
    pub client_message_id: String,
    pub conversation_id: String,
    pub time: DateTime<Utc>,
}

impl ChatClient {
    /// Sends a plain text message. Returns the minted client message id;
    /// delivery progress is visible through the message's status.
    pub async fn send_text(
        &self,
        text: impl Into<String>,
        avatar_url: Option<String>,
    ) -> Result<String, ClientError> {
        let payload = Payload::User(UserPayload {
            text: text.into(),
            avatar_url,
        });
        self.dispatch_message(MessageKind::User, payload).await
    }

    /// Sends the delivery address / measurements card.
    pub async fn send_delivery_details(
        &self,
        details: DeliveryMeasurementPayload,
    ) -> Result<String, ClientError> {
        self.dispatch_message(
            MessageKind::DeliveryMeasurementCard,
            Payload::DeliveryMeasurement(details),
        )
        .await
    }

    /// Re-enters the pipeline for a failed message, reusing its payload
    /// under a freshly minted client message id. Only valid from
    /// `failed`.
    pub async fn retry(&self, client_message_id: &str) -> Result<String, ClientError> {
        let (kind, data) = {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(ClientError::NoActiveConversation)?;
            let Some(existing) = session.store.get_by_client_id(client_message_id) else {
                return Err(ClientError::UnknownMessage(client_message_id.to_string()));
            };
            if !existing.status.is_failed() {
                return Err(ClientError::NotRetryable(client_message_id.to_string()));
            }
            let removed = session
                .store
                .remove_by_client_id(client_message_id)
                .expect("entry exists, we just looked it up");
            session.cache.supersede(client_message_id);
            (removed.kind, removed.data)
        };

        match (kind, data) {
            (MessageKind::Image, Payload::Image(image)) => {
                let Some(bytes) = image.local_bytes else {
                    return Err(ClientError::NotRetryable(client_message_id.to_string()));
                };
                let file_name = image.file_name.unwrap_or_else(|| "upload.bin".to_string());
                self.start_image_send(file_name, bytes, image.caption).await
            }
            (kind, data) => self.dispatch_message(kind, data).await,
        }
    }

    /// Optimistic insert followed by the transport emit. A transport
    /// failure marks the message failed; it never unwinds the insert.
    pub(crate) async fn dispatch_message(
        &self,
        kind: MessageKind,
        data: Payload,
    ) -> Result<String, ClientError> {
        let entry = self
            .insert_optimistic(kind, data.clone(), MessageStatus::Pending)
            .await?;
        if let Err(e) = self.emit_message(&entry, kind, &data).await {
            warn!(
                "transport emit failed for {}: {e:#}",
                entry.client_message_id
            );
            self.fail_message(&entry.client_message_id).await;
        }
        Ok(entry.client_message_id)
    }

    /// Puts a freshly minted message into the store and snapshots its
    /// payload into the optimistic cache.
    pub(crate) async fn insert_optimistic(
        &self,
        kind: MessageKind,
        data: Payload,
        status: MessageStatus,
    ) -> Result<PendingEntry, ClientError> {
        let client_message_id = self.generate_client_message_id();
        self.insert_optimistic_entry(client_message_id, kind, data, status)
            .await
    }

    /// Same as [`Self::insert_optimistic`] for callers that minted the
    /// client message id up front (the upload pipeline names its preview
    /// handle after it).
    pub(crate) async fn insert_optimistic_entry(
        &self,
        client_message_id: String,
        kind: MessageKind,
        data: Payload,
        status: MessageStatus,
    ) -> Result<PendingEntry, ClientError> {
        let time = Utc::now();

        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(ClientError::NoActiveConversation)?;
        let message = Message {
            id: None,
            client_message_id: Some(client_message_id.clone()),
            kind,
            sender: self.config.own_role,
            sender_id: self.config.own_participant_id.clone(),
            time,
            status,
            data: data.clone(),
        };
        session.store.insert_or_merge(message);
        session.cache.record(&client_message_id, kind, data);
        Ok(PendingEntry {
            client_message_id,
            conversation_id: session.conversation_id.clone(),
            time,
        })
    }

    pub(crate) async fn emit_message(
        &self,
        entry: &PendingEntry,
        kind: MessageKind,
        data: &Payload,
    ) -> anyhow::Result<()> {
        let wire = wire_message(entry, kind, data, self.config.own_participant_id.as_deref());
        self.transport.emit("message", wire).await
    }

    pub(crate) async fn fail_message(&self, client_message_id: &str) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            session.store.mark_failed(client_message_id);
        }
    }
}

/// Builds the outbound wire form: a flat envelope carrying the canonical
/// kind token plus the payload's own fields.
fn wire_message(
    entry: &PendingEntry,
    kind: MessageKind,
    data: &Payload,
    sender_id: Option<&str>,
) -> Value {
    let mut wire = Map::new();
    wire.insert(
        "conversationId".to_string(),
        json!(entry.conversation_id),
    );
    wire.insert(
        "clientMessageId".to_string(),
        json!(entry.client_message_id),
    );
    wire.insert("type".to_string(), json!(kind.wire_token()));
    wire.insert("senderId".to_string(), json!(sender_id));
    wire.insert("time".to_string(), json!(entry.time.to_rfc3339()));

    let body = match data {
        Payload::User(p) => json!({ "text": p.text, "avatar": p.avatar_url }),
        Payload::Image(p) => json!({
            "imageUrl": p.image_url,
            "caption": p.caption,
            "fileName": p.file_name,
        }),
        Payload::Payment(p) => json!({
            "amount": p.amount,
            "currency": p.currency,
            "payer": p.payer,
            "reference": p.reference,
        }),
        Payload::DeliveryMeasurement(p) => json!({
            "fullName": p.full_name,
            "phone": p.phone,
            "address": p.address,
            "country": p.country,
            "measurements": p.measurements,
            "shippingStatus": p.shipping_status,
        }),
        Payload::Action(p) => json!({
            "label": p.label,
            "jobId": p.job_id,
            "amount": p.amount,
        }),
    };
    if let Value::Object(fields) = body {
        wire.extend(fields);
    }
    Value::Object(wire)
}
