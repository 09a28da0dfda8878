//! Provider webhook payloads: the raw field map, the canonical inbound
//! email, and delivery events.

mod events;
mod normalize;
mod payload;

pub use events::{parse_delivery_event, DeliveryEvent, DeliveryEventKind};
pub use normalize::{normalize, InboundEmail, NormalizeError};
pub use payload::{PayloadError, WebhookPayload};
