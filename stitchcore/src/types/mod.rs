pub mod message;
pub mod participant;

pub use message::{
    ActionPayload, DeliveryMeasurementPayload, ImagePayload, Message, MessageKind, MessageStatus,
    Payload, PaymentPayload, SenderRole, UserPayload,
};
pub use participant::Participants;
