mod config;
mod handlers;
mod server;
mod state;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{ServiceConfig, DEFAULT_INBOUND_BODY_MAX_BYTES};
pub use handlers::{domain_report, handle_event_payload, handle_inbound_payload};
pub use server::{build_router, run_server};
pub use state::AppState;
