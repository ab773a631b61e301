//! Normalization of raw wire objects into canonical messages.
//!
//! The history endpoint and the live transport deliver the same logical
//! messages in several different shapes (structured `data`, legacy
//! `attachments`, JSON packed into a string `content` field). This module
//! maps all of them onto [`Message`], consulting the optimistic cache for
//! fields the server stripped, and never fails: the worst case is a
//! defaulted payload and a logged warning.

use crate::cache::OptimisticCache;
use crate::types::{
    ActionPayload, DeliveryMeasurementPayload, ImagePayload, Message, MessageKind, MessageStatus,
    Participants, Payload, PaymentPayload, SenderRole, UserPayload,
};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything kind/sender/payload resolution is allowed to look at.
/// Normalization is pure given this context.
pub struct NormalizeContext<'a> {
    pub participants: &'a Participants,
    pub fallback_role: SenderRole,
    pub cache: Option<&'a OptimisticCache>,
}

/// How confidently the kind of a raw message was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindConfidence {
    /// An explicit type token matched the table.
    Token,
    /// Only the content-substring heuristic matched. Low confidence.
    ContentHeuristic,
    /// Nothing matched; forward-compatible `user` default.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedKind {
    pub kind: MessageKind,
    pub confidence: KindConfidence,
}

/// Raw type tokens, in precedence order. This is the one canonical table;
/// every ingestion path resolves kinds through it.
const KIND_TOKEN_FIELDS: [&str; 4] = ["type", "messageType", "kind", "actionType"];

/// Resolves the kind of a raw wire object against the closed kind set.
///
/// The explicit token fields are evaluated in order and the first one that
/// maps wins. If none match, a substring check on a textual `content`
/// field is tried as a last-resort, degraded-confidence branch. Unmatched
/// input defaults to [`MessageKind::User`].
pub fn resolve_kind(raw: &Value) -> ResolvedKind {
    for field in KIND_TOKEN_FIELDS {
        if let Some(token) = raw.get(field).and_then(Value::as_str) {
            if let Some(kind) = MessageKind::from_token(token) {
                return ResolvedKind {
                    kind,
                    confidence: KindConfidence::Token,
                };
            }
        }
    }

    if let Some(content) = raw.get("content").and_then(Value::as_str) {
        if !looks_like_json(content) {
            let lowered = content.to_ascii_lowercase();
            let guess = if lowered.contains("delivery") && lowered.contains("measurement") {
                Some(MessageKind::DeliveryMeasurementCard)
            } else if lowered.contains("escrow") && lowered.contains("release") {
                Some(MessageKind::EscrowRelease)
            } else if lowered.contains("escrow") {
                Some(MessageKind::EscrowPayment)
            } else {
                None
            };
            if let Some(kind) = guess {
                return ResolvedKind {
                    kind,
                    confidence: KindConfidence::ContentHeuristic,
                };
            }
        }
    }

    ResolvedKind {
        kind: MessageKind::User,
        confidence: KindConfidence::Default,
    }
}

/// Maps one raw history/transport object into a canonical [`Message`].
///
/// Pure given `ctx`; the cache is consulted read-only. Never panics and
/// never returns an error: malformed pieces degrade field-by-field.
pub fn normalize(raw: &Value, ctx: &NormalizeContext<'_>) -> Message {
    if !raw.is_object() {
        warn!("normalize: non-object wire payload, emitting empty user message");
    }

    let resolved = resolve_kind(raw);
    if resolved.confidence == KindConfidence::ContentHeuristic {
        warn!(
            "normalize: kind {:?} resolved from content substring only",
            resolved.kind
        );
    }

    let id = first_string(raw, &["id", "_id", "messageId", "message_id", "serverId"]);
    let client_message_id = first_string(
        raw,
        &[
            "clientMessageId",
            "client_message_id",
            "clientId",
            "client_id",
            "tempId",
            "localId",
        ],
    );

    let (sender, sender_id) = resolve_sender(raw, ctx);
    let time = resolve_time(raw);
    let status = first_string(raw, &["status", "state"])
        .and_then(|s| MessageStatus::from_token(&s))
        .unwrap_or(MessageStatus::Sent);

    let sources = FieldSources::collect(raw);
    let content_text = raw
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !looks_like_json(s));

    let mut data = match resolved.kind {
        MessageKind::User => Payload::User(extract_user(&sources, content_text)),
        MessageKind::Image => Payload::Image(extract_image(&sources)),
        MessageKind::Payment | MessageKind::EscrowPayment | MessageKind::EscrowRelease => {
            Payload::Payment(extract_payment(&sources))
        }
        MessageKind::DeliveryMeasurementCard => {
            Payload::DeliveryMeasurement(extract_delivery(&sources))
        }
        MessageKind::SystemAccepted
        | MessageKind::ActionPayment
        | MessageKind::ActionDeliveryMeasurement
        | MessageKind::ActionCompleted => Payload::Action(extract_action(&sources, content_text)),
    };

    // Last fallback before kind defaults: the payload snapshot taken when
    // this message was optimistically created, if we still hold one.
    if let (Some(cache), Some(cmid)) = (ctx.cache, client_message_id.as_deref()) {
        if let Some(entry) = cache.peek(cmid) {
            data.fill_missing_from(&entry.payload);
        }
    }

    Message {
        id,
        client_message_id,
        kind: resolved.kind,
        sender,
        sender_id,
        time,
        status,
        data,
    }
}

fn resolve_sender(raw: &Value, ctx: &NormalizeContext<'_>) -> (SenderRole, Option<String>) {
    let sender_id = first_string(raw, &["senderId", "sender_id", "from", "userId", "user_id"])
        .or_else(|| {
            raw.get("sender").and_then(|s| match s {
                Value::String(id) => Some(id.clone()),
                Value::Object(obj) => obj
                    .get("_id")
                    .or_else(|| obj.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
        });

    let explicit_role = first_string(
        raw,
        &["senderRole", "sender_role", "role", "senderType", "sender_type"],
    )
    .or_else(|| {
        raw.get("sender")
            .and_then(Value::as_object)
            .and_then(|obj| obj.get("role"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
    .and_then(|token| SenderRole::from_token(&token));

    if let Some(role) = explicit_role {
        return (role, sender_id);
    }

    if let Some(id) = sender_id.as_deref() {
        if let Some(role) = ctx.participants.role_of(id) {
            return (role, sender_id);
        }
    }

    warn!(
        "normalize: could not resolve sender role (senderId: {:?}), using {:?}",
        sender_id, ctx.fallback_role
    );
    (ctx.fallback_role, sender_id)
}

/// Extracts a timestamp from the usual wire spellings: RFC 3339 strings,
/// epoch seconds, or epoch milliseconds.
pub fn wire_time(raw: &Value) -> Option<DateTime<Utc>> {
    for key in ["time", "timestamp", "createdAt", "created_at", "sentAt"] {
        match raw.get(key) {
            Some(Value::String(s)) => {
                if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                    return Some(parsed.with_timezone(&Utc));
                }
            }
            Some(Value::Number(n)) => {
                if let Some(epoch) = n.as_i64() {
                    // Heuristic threshold between epoch seconds and millis.
                    let parsed = if epoch > 10_000_000_000 {
                        DateTime::from_timestamp_millis(epoch)
                    } else {
                        DateTime::from_timestamp(epoch, 0)
                    };
                    if parsed.is_some() {
                        return parsed;
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn resolve_time(raw: &Value) -> DateTime<Utc> {
    wire_time(raw).unwrap_or_else(|| {
        debug!("normalize: no usable timestamp on wire object, defaulting to now");
        Utc::now()
    })
}

/// Candidate payload objects in fallback order: explicit structured
/// `data`, then legacy `attachments` entries, then JSON parsed out of a
/// string `content` field. Each payload field independently takes the
/// first source that supplies it.
struct FieldSources {
    sources: Vec<Value>,
}

impl FieldSources {
    fn collect(raw: &Value) -> Self {
        let mut sources = Vec::new();

        if let Some(data) = raw.get("data").filter(|v| v.is_object()) {
            sources.push(data.clone());
        }

        if let Some(attachments) = raw.get("attachments").and_then(Value::as_array) {
            for entry in attachments.iter().filter(|v| v.is_object()) {
                sources.push(entry.clone());
            }
        }

        if let Some(content) = raw.get("content").and_then(Value::as_str) {
            if looks_like_json(content) {
                match serde_json::from_str::<Value>(content) {
                    Ok(parsed) if parsed.is_object() => sources.push(parsed),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("normalize: unparseable content JSON, degrading to defaults: {e}");
                    }
                }
            }
        }

        Self { sources }
    }

    fn first_str(&self, keys: &[&str]) -> Option<String> {
        for source in &self.sources {
            if let Some(found) = first_string(source, keys) {
                return Some(found);
            }
        }
        None
    }

    /// Like `first_str` but also accepts numbers, stringified. Used for
    /// amounts, which the backend sends as either.
    fn first_scalar(&self, keys: &[&str]) -> Option<String> {
        for source in &self.sources {
            for key in keys {
                match source.get(*key) {
                    Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
                    Some(Value::Number(n)) => return Some(n.to_string()),
                    _ => {}
                }
            }
        }
        None
    }

    fn first_map(&self, keys: &[&str]) -> Option<BTreeMap<String, String>> {
        for source in &self.sources {
            for key in keys {
                if let Some(obj) = source.get(*key).and_then(Value::as_object) {
                    if obj.is_empty() {
                        continue;
                    }
                    let map = obj
                        .iter()
                        .map(|(k, v)| {
                            let rendered = match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            (k.clone(), rendered)
                        })
                        .collect();
                    return Some(map);
                }
            }
        }
        None
    }
}

fn extract_user(sources: &FieldSources, content_text: Option<&str>) -> UserPayload {
    UserPayload {
        text: sources
            .first_str(&["text", "message", "body"])
            .or_else(|| content_text.map(str::to_string))
            .unwrap_or_default(),
        avatar_url: sources.first_str(&["avatar", "avatarUrl", "avatar_url", "senderAvatar"]),
    }
}

fn extract_image(sources: &FieldSources) -> ImagePayload {
    ImagePayload {
        image_url: sources.first_str(&["imageUrl", "image_url", "url", "src"]),
        preview_url: sources.first_str(&["previewUrl", "preview_url", "preview"]),
        caption: sources.first_str(&["caption", "text"]),
        file_name: sources.first_str(&["fileName", "file_name", "name"]),
        local_bytes: None,
    }
}

fn extract_payment(sources: &FieldSources) -> PaymentPayload {
    PaymentPayload {
        amount: sources.first_scalar(&["amount", "price", "value"]),
        currency: sources.first_str(&["currency"]),
        payer: sources.first_str(&["payer", "paidBy", "payerId", "payer_id"]),
        reference: sources.first_str(&["reference", "txRef", "transactionRef", "transactionId"]),
    }
}

fn extract_delivery(sources: &FieldSources) -> DeliveryMeasurementPayload {
    let mut payload = DeliveryMeasurementPayload {
        full_name: sources
            .first_str(&["fullName", "full_name", "name"])
            .unwrap_or_default(),
        phone: sources
            .first_str(&["phone", "phoneNumber", "phone_number"])
            .unwrap_or_default(),
        address: sources
            .first_str(&["address", "deliveryAddress", "delivery_address"])
            .unwrap_or_default(),
        country: sources.first_str(&["country"]).unwrap_or_default(),
        measurements: sources
            .first_map(&["measurements", "sizes"])
            .unwrap_or_default(),
        ..Default::default()
    };
    if let Some(status) = sources.first_str(&["shippingStatus", "shipping_status", "deliveryStatus"])
    {
        payload.shipping_status = status;
    }
    payload
}

fn extract_action(sources: &FieldSources, content_text: Option<&str>) -> ActionPayload {
    ActionPayload {
        label: sources
            .first_str(&["label", "title", "text"])
            .or_else(|| content_text.map(str::to_string)),
        job_id: sources.first_str(&["jobId", "job_id", "orderId", "order_id"]),
        amount: sources.first_scalar(&["amount", "price"]),
    }
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

fn looks_like_json(s: &str) -> bool {
    let trimmed = s.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(participants: &'a Participants, cache: Option<&'a OptimisticCache>) -> NormalizeContext<'a> {
        NormalizeContext {
            participants,
            fallback_role: SenderRole::Creator,
            cache,
        }
    }

    #[test]
    fn delivery_card_from_packed_content() {
        let participants = Participants::new("m1", "c1");
        let raw = json!({
            "type": "delivery_and_measurements",
            "senderId": "c1",
            "content": r#"{"fullName":"Jane","country":"NG"}"#,
        });
        let msg = normalize(&raw, &ctx(&participants, None));
        assert_eq!(msg.kind, MessageKind::DeliveryMeasurementCard);
        assert_eq!(msg.sender, SenderRole::Creator);
        match &msg.data {
            Payload::DeliveryMeasurement(p) => {
                assert_eq!(p.full_name, "Jane");
                assert_eq!(p.country, "NG");
                assert_eq!(p.shipping_status, "Pending");
                assert!(p.phone.is_empty());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn cache_fills_fields_the_wire_omitted() {
        let participants = Participants::new("m1", "c1");
        let mut cache = OptimisticCache::new(8);
        cache.record(
            "cm-7",
            MessageKind::DeliveryMeasurementCard,
            Payload::DeliveryMeasurement(DeliveryMeasurementPayload {
                full_name: "Jane Doe".into(),
                phone: "+2348000000".into(),
                address: "12 Harbour Rd".into(),
                ..Default::default()
            }),
        );
        let raw = json!({
            "type": "deliveryMeasurement.card",
            "clientMessageId": "cm-7",
            "data": { "country": "NG" },
        });
        let msg = normalize(&raw, &ctx(&participants, Some(&cache)));
        match &msg.data {
            Payload::DeliveryMeasurement(p) => {
                assert_eq!(p.country, "NG");
                assert_eq!(p.full_name, "Jane Doe");
                assert_eq!(p.phone, "+2348000000");
                assert_eq!(p.address, "12 Harbour Rd");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn data_beats_attachments_beats_content() {
        let participants = Participants::default();
        let raw = json!({
            "type": "image",
            "data": { "imageUrl": "https://cdn/real.png" },
            "attachments": [ { "imageUrl": "https://cdn/attachment.png", "caption": "older shape" } ],
            "content": r#"{"imageUrl":"https://cdn/content.png"}"#,
        });
        let msg = normalize(&raw, &ctx(&participants, None));
        match &msg.data {
            Payload::Image(p) => {
                assert_eq!(p.image_url.as_deref(), Some("https://cdn/real.png"));
                // caption only exists on the attachment entry
                assert_eq!(p.caption.as_deref(), Some("older shape"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_defaults_to_user() {
        let participants = Participants::default();
        let raw = json!({ "type": "sticker.animated", "content": "look at this" });
        let msg = normalize(&raw, &ctx(&participants, None));
        assert_eq!(msg.kind, MessageKind::User);
        match &msg.data {
            Payload::User(p) => assert_eq!(p.text, "look at this"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn malformed_content_json_degrades_to_defaults() {
        let participants = Participants::default();
        let raw = json!({
            "type": "deliveryMeasurement.card",
            "content": "{not valid json",
        });
        let msg = normalize(&raw, &ctx(&participants, None));
        match &msg.data {
            Payload::DeliveryMeasurement(p) => {
                assert!(p.full_name.is_empty());
                assert_eq!(p.shipping_status, "Pending");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn content_heuristic_is_last_resort() {
        let participants = Participants::default();
        let raw = json!({ "content": "Delivery & Measurement details requested" });
        let resolved = resolve_kind(&raw);
        assert_eq!(resolved.kind, MessageKind::DeliveryMeasurementCard);
        assert_eq!(resolved.confidence, KindConfidence::ContentHeuristic);

        // An explicit token always wins over the heuristic.
        let raw = json!({
            "type": "user",
            "content": "Delivery & Measurement details requested",
        });
        let resolved = resolve_kind(&raw);
        assert_eq!(resolved.kind, MessageKind::User);
        assert_eq!(resolved.confidence, KindConfidence::Token);
    }

    #[test]
    fn ordered_token_fields_first_match_wins() {
        let raw = json!({ "messageType": "payment", "kind": "image" });
        assert_eq!(resolve_kind(&raw).kind, MessageKind::Payment);

        let raw = json!({ "type": "image", "actionType": "make_payment" });
        assert_eq!(resolve_kind(&raw).kind, MessageKind::Image);
    }

    #[test]
    fn epoch_and_rfc3339_times_both_parse() {
        let participants = Participants::default();
        let raw = json!({ "type": "user", "time": "2025-03-01T10:00:00Z", "content": "a" });
        let msg = normalize(&raw, &ctx(&participants, None));
        assert_eq!(msg.time.timestamp(), 1_740_823_200);

        let raw = json!({ "type": "user", "timestamp": 1_740_823_200_i64, "content": "a" });
        let msg = normalize(&raw, &ctx(&participants, None));
        assert_eq!(msg.time.timestamp(), 1_740_823_200);

        let raw = json!({ "type": "user", "timestamp": 1_740_823_200_000_i64, "content": "a" });
        let msg = normalize(&raw, &ctx(&participants, None));
        assert_eq!(msg.time.timestamp(), 1_740_823_200);
    }

    #[test]
    fn sender_falls_back_to_configured_role() {
        let participants = Participants::new("m1", "c1");
        let raw = json!({ "type": "user", "senderId": "ghost", "content": "hi" });
        let msg = normalize(&raw, &ctx(&participants, None));
        assert_eq!(msg.sender, SenderRole::Creator);
        assert_eq!(msg.sender_id.as_deref(), Some("ghost"));
    }

    #[test]
    fn sender_object_shape_resolves() {
        let participants = Participants::new("m1", "c1");
        let raw = json!({
            "type": "user",
            "sender": { "_id": "m1", "name": "Ada" },
            "content": "hello",
        });
        let msg = normalize(&raw, &ctx(&participants, None));
        assert_eq!(msg.sender, SenderRole::Maker);
        assert_eq!(msg.sender_id.as_deref(), Some("m1"));
    }
}
