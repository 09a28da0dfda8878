pub mod campaign;
pub mod directory;
pub mod engine;
pub mod html;
pub mod inbound;
pub mod models;
pub mod outbound;
pub mod service;
pub mod signature;
pub mod store;
pub mod threading;
pub mod url_triggers;

pub use campaign::{CampaignScheduler, RunReport, SchedulerError, SchedulerStatus};
pub use engine::{ConversationEngine, DeliveryOutcome, InboundOutcome, ProcessError, ReplySummary};
pub use inbound::{normalize, InboundEmail, WebhookPayload};
pub use outbound::{MailTransport, MailgunTransport, OutboundEmail, TransportError};
pub use store::{ConversationStore, StoreError};
