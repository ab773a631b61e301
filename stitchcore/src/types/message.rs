use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Closed set of message kinds the conversation view knows how to render.
///
/// Anything the backend sends that does not resolve to one of these falls
/// back to [`MessageKind::User`] so new server-side kinds degrade to a
/// plain text bubble instead of breaking the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "system.accepted")]
    SystemAccepted,
    #[serde(rename = "payment")]
    Payment,
    #[serde(rename = "action.payment")]
    ActionPayment,
    #[serde(rename = "action.deliveryMeasurement")]
    ActionDeliveryMeasurement,
    #[serde(rename = "deliveryMeasurement.card")]
    DeliveryMeasurementCard,
    #[serde(rename = "action.completed")]
    ActionCompleted,
    #[serde(rename = "escrow.payment")]
    EscrowPayment,
    #[serde(rename = "escrow.release")]
    EscrowRelease,
}

impl MessageKind {
    pub fn wire_token(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Image => "image",
            Self::SystemAccepted => "system.accepted",
            Self::Payment => "payment",
            Self::ActionPayment => "action.payment",
            Self::ActionDeliveryMeasurement => "action.deliveryMeasurement",
            Self::DeliveryMeasurementCard => "deliveryMeasurement.card",
            Self::ActionCompleted => "action.completed",
            Self::EscrowPayment => "escrow.payment",
            Self::EscrowRelease => "escrow.release",
        }
    }

    /// Maps a raw wire token to a kind. Legacy backend spellings are
    /// accepted alongside the canonical tokens.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "user" | "text" | "message" | "chat" => Some(Self::User),
            "image" | "photo" | "picture" => Some(Self::Image),
            "system.accepted" | "accepted" | "job_accepted" | "offer_accepted" => {
                Some(Self::SystemAccepted)
            }
            "payment" | "payment_received" => Some(Self::Payment),
            "action.payment" | "payment_action" | "make_payment" | "request_payment" => {
                Some(Self::ActionPayment)
            }
            "action.deliverymeasurement"
            | "delivery_measurement_action"
            | "request_delivery_details"
            | "request_measurements" => Some(Self::ActionDeliveryMeasurement),
            "deliverymeasurement.card"
            | "delivery_and_measurements"
            | "delivery_measurement"
            | "delivery_details" => Some(Self::DeliveryMeasurementCard),
            "action.completed" | "completed" | "job_completed" | "mark_completed" => {
                Some(Self::ActionCompleted)
            }
            "escrow.payment" | "escrow_payment" | "escrow_fund" => Some(Self::EscrowPayment),
            "escrow.release" | "escrow_release" => Some(Self::EscrowRelease),
            _ => None,
        }
    }
}

/// Lifecycle state of a message inside the conversation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Uploading,
    Sent,
    Uploaded,
    Failed,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "uploading" => Some(Self::Uploading),
            "sent" => Some(Self::Sent),
            "uploaded" => Some(Self::Uploaded),
            "failed" | "error" => Some(Self::Failed),
            "delivered" => Some(Self::Delivered),
            "read" | "seen" => Some(Self::Read),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Receipt ordering: `sent`/`uploaded` < `delivered` < `read`.
    /// Non-acknowledged states have no rank and never accept receipts.
    pub fn receipt_rank(&self) -> Option<u8> {
        match self {
            Self::Sent | Self::Uploaded => Some(0),
            Self::Delivered => Some(1),
            Self::Read => Some(2),
            _ => None,
        }
    }
}

/// Which side of the marketplace a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Maker,
    Creator,
    System,
}

impl SenderRole {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "maker" | "seller" | "provider" => Some(Self::Maker),
            "creator" | "client" | "buyer" | "customer" => Some(Self::Creator),
            "system" | "admin" | "bot" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserPayload {
    fn overlay_from(&mut self, incoming: &Self) {
        if !incoming.text.is_empty() {
            self.text = incoming.text.clone();
        }
        if incoming.avatar_url.is_some() {
            self.avatar_url = incoming.avatar_url.clone();
        }
    }

    fn fill_missing_from(&mut self, fallback: &Self) {
        if self.text.is_empty() {
            self.text = fallback.text.clone();
        }
        if self.avatar_url.is_none() {
            self.avatar_url = fallback.avatar_url.clone();
        }
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// File contents held locally until the upload succeeds, so an explicit
    /// user retry can re-run the upload without re-reading the file.
    #[serde(skip)]
    pub local_bytes: Option<Arc<Vec<u8>>>,
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("image_url", &self.image_url)
            .field("preview_url", &self.preview_url)
            .field("caption", &self.caption)
            .field("file_name", &self.file_name)
            .field(
                "local_bytes",
                &self.local_bytes.as_ref().map(|b| format!("{} bytes", b.len())),
            )
            .finish()
    }
}

impl ImagePayload {
    fn overlay_from(&mut self, incoming: &Self) {
        if incoming.image_url.is_some() {
            self.image_url = incoming.image_url.clone();
        }
        if incoming.preview_url.is_some() {
            self.preview_url = incoming.preview_url.clone();
        }
        if incoming.caption.is_some() {
            self.caption = incoming.caption.clone();
        }
        if incoming.file_name.is_some() {
            self.file_name = incoming.file_name.clone();
        }
        if incoming.local_bytes.is_some() {
            self.local_bytes = incoming.local_bytes.clone();
        }
    }

    fn fill_missing_from(&mut self, fallback: &Self) {
        if self.image_url.is_none() {
            self.image_url = fallback.image_url.clone();
        }
        if self.preview_url.is_none() {
            self.preview_url = fallback.preview_url.clone();
        }
        if self.caption.is_none() {
            self.caption = fallback.caption.clone();
        }
        if self.file_name.is_none() {
            self.file_name = fallback.file_name.clone();
        }
        if self.local_bytes.is_none() {
            self.local_bytes = fallback.local_bytes.clone();
        }
    }
}

/// Shared payload for `payment`, `escrow.payment` and `escrow.release`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl PaymentPayload {
    fn overlay_from(&mut self, incoming: &Self) {
        if incoming.amount.is_some() {
            self.amount = incoming.amount.clone();
        }
        if incoming.currency.is_some() {
            self.currency = incoming.currency.clone();
        }
        if incoming.payer.is_some() {
            self.payer = incoming.payer.clone();
        }
        if incoming.reference.is_some() {
            self.reference = incoming.reference.clone();
        }
    }

    fn fill_missing_from(&mut self, fallback: &Self) {
        if self.amount.is_none() {
            self.amount = fallback.amount.clone();
        }
        if self.currency.is_none() {
            self.currency = fallback.currency.clone();
        }
        if self.payer.is_none() {
            self.payer = fallback.payer.clone();
        }
        if self.reference.is_none() {
            self.reference = fallback.reference.clone();
        }
    }
}

/// Delivery address and garment measurements card.
///
/// Every display field is always populated — missing upstream data degrades
/// to an empty string, and `shipping_status` defaults to `"Pending"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMeasurementPayload {
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub country: String,
    pub measurements: BTreeMap<String, String>,
    pub shipping_status: String,
}

pub const SHIPPING_STATUS_PENDING: &str = "Pending";

impl Default for DeliveryMeasurementPayload {
    fn default() -> Self {
        Self {
            full_name: String::new(),
            phone: String::new(),
            address: String::new(),
            country: String::new(),
            measurements: BTreeMap::new(),
            shipping_status: SHIPPING_STATUS_PENDING.to_string(),
        }
    }
}

impl DeliveryMeasurementPayload {
    fn overlay_from(&mut self, incoming: &Self) {
        if !incoming.full_name.is_empty() {
            self.full_name = incoming.full_name.clone();
        }
        if !incoming.phone.is_empty() {
            self.phone = incoming.phone.clone();
        }
        if !incoming.address.is_empty() {
            self.address = incoming.address.clone();
        }
        if !incoming.country.is_empty() {
            self.country = incoming.country.clone();
        }
        if !incoming.measurements.is_empty() {
            self.measurements = incoming.measurements.clone();
        }
        if incoming.shipping_status != SHIPPING_STATUS_PENDING
            && !incoming.shipping_status.is_empty()
        {
            self.shipping_status = incoming.shipping_status.clone();
        }
    }

    fn fill_missing_from(&mut self, fallback: &Self) {
        if self.full_name.is_empty() {
            self.full_name = fallback.full_name.clone();
        }
        if self.phone.is_empty() {
            self.phone = fallback.phone.clone();
        }
        if self.address.is_empty() {
            self.address = fallback.address.clone();
        }
        if self.country.is_empty() {
            self.country = fallback.country.clone();
        }
        if self.measurements.is_empty() {
            self.measurements = fallback.measurements.clone();
        }
        if self.shipping_status == SHIPPING_STATUS_PENDING
            && fallback.shipping_status != SHIPPING_STATUS_PENDING
            && !fallback.shipping_status.is_empty()
        {
            self.shipping_status = fallback.shipping_status.clone();
        }
    }
}

/// Payload for the system/action kinds (`system.accepted`, `action.*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
}

impl ActionPayload {
    fn overlay_from(&mut self, incoming: &Self) {
        if incoming.label.is_some() {
            self.label = incoming.label.clone();
        }
        if incoming.job_id.is_some() {
            self.job_id = incoming.job_id.clone();
        }
        if incoming.amount.is_some() {
            self.amount = incoming.amount.clone();
        }
    }

    fn fill_missing_from(&mut self, fallback: &Self) {
        if self.label.is_none() {
            self.label = fallback.label.clone();
        }
        if self.job_id.is_none() {
            self.job_id = fallback.job_id.clone();
        }
        if self.amount.is_none() {
            self.amount = fallback.amount.clone();
        }
    }
}

/// Kind-specific message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    User(UserPayload),
    Image(ImagePayload),
    Payment(PaymentPayload),
    DeliveryMeasurement(DeliveryMeasurementPayload),
    Action(ActionPayload),
}

impl Payload {
    pub fn default_for(kind: MessageKind) -> Self {
        match kind {
            MessageKind::User => Self::User(UserPayload::default()),
            MessageKind::Image => Self::Image(ImagePayload::default()),
            MessageKind::Payment | MessageKind::EscrowPayment | MessageKind::EscrowRelease => {
                Self::Payment(PaymentPayload::default())
            }
            MessageKind::DeliveryMeasurementCard => {
                Self::DeliveryMeasurement(DeliveryMeasurementPayload::default())
            }
            MessageKind::SystemAccepted
            | MessageKind::ActionPayment
            | MessageKind::ActionDeliveryMeasurement
            | MessageKind::ActionCompleted => Self::Action(ActionPayload::default()),
        }
    }

    pub fn same_family(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::User(_), Self::User(_))
                | (Self::Image(_), Self::Image(_))
                | (Self::Payment(_), Self::Payment(_))
                | (Self::DeliveryMeasurement(_), Self::DeliveryMeasurement(_))
                | (Self::Action(_), Self::Action(_))
        )
    }

    /// Overlays the fields `incoming` actually supplies onto `self`.
    /// No-op if the two payloads are of different families.
    pub fn overlay_from(&mut self, incoming: &Self) {
        match (self, incoming) {
            (Self::User(a), Self::User(b)) => a.overlay_from(b),
            (Self::Image(a), Self::Image(b)) => a.overlay_from(b),
            (Self::Payment(a), Self::Payment(b)) => a.overlay_from(b),
            (Self::DeliveryMeasurement(a), Self::DeliveryMeasurement(b)) => a.overlay_from(b),
            (Self::Action(a), Self::Action(b)) => a.overlay_from(b),
            _ => {}
        }
    }

    /// Fills fields missing from `self` with values from `fallback`.
    /// No-op if the two payloads are of different families.
    pub fn fill_missing_from(&mut self, fallback: &Self) {
        match (self, fallback) {
            (Self::User(a), Self::User(b)) => a.fill_missing_from(b),
            (Self::Image(a), Self::Image(b)) => a.fill_missing_from(b),
            (Self::Payment(a), Self::Payment(b)) => a.fill_missing_from(b),
            (Self::DeliveryMeasurement(a), Self::DeliveryMeasurement(b)) => a.fill_missing_from(b),
            (Self::Action(a), Self::Action(b)) => a.fill_missing_from(b),
            _ => {}
        }
    }
}

/// Canonical message shape every component of the engine operates on,
/// independent of whatever the history endpoint or the live transport
/// actually put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identity; absent until acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Client-minted correlation key; present for any message that
    /// originated on this device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    pub kind: MessageKind,
    pub sender: SenderRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    pub time: DateTime<Utc>,
    pub status: MessageStatus,
    pub data: Payload,
}

impl Message {
    /// Merges the fields `incoming` actually supplies into `self`.
    ///
    /// `id`/`sender_id` apply when present; `time` and `status` always
    /// apply (the wire always carries them). The sender role applies only
    /// when the incoming message identified its sender, so a fallback
    /// role guess never clobbers a known one. Payloads of the same family
    /// merge field-by-field; a different family replaces the payload
    /// wholesale, except that a default `user` classification never
    /// downgrades a concrete kind.
    pub fn absorb(&mut self, incoming: &Message) {
        if incoming.id.is_some() {
            self.id = incoming.id.clone();
        }
        if incoming.client_message_id.is_some() {
            self.client_message_id = incoming.client_message_id.clone();
        }
        if incoming.sender_id.is_some() {
            self.sender_id = incoming.sender_id.clone();
            self.sender = incoming.sender;
        }
        self.time = incoming.time;
        self.status = incoming.status;

        if self.data.same_family(&incoming.data) {
            self.kind = incoming.kind;
            self.data.overlay_from(&incoming.data);
        } else if incoming.kind != MessageKind::User {
            self.kind = incoming.kind;
            self.data = incoming.data.clone();
        }
    }
}
