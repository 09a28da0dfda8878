use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use agent_reply_module::{AgentCore, OpenAiCompletionClient, Sanitizer};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tokio::task;
use tracing::{info, warn};

use crate::campaign::CampaignScheduler;
use crate::directory::{apply_directory, load_directory, DirectoryFile};
use crate::engine::ConversationEngine;
use crate::outbound::{MailTransport, MailgunTransport};
use crate::store::ConversationStore;

use super::config::ServiceConfig;
use super::handlers::{
    events_webhook, health, health_domains, inbound_webhook, scheduler_run, scheduler_status,
};
use super::state::AppState;
use super::BoxError;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.inbound_body_max_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/health/domains", get(health_domains))
        .route("/webhooks/inbound", post(inbound_webhook))
        .route("/webhooks/events", post(events_webhook))
        .route("/scheduler/run", post(scheduler_run))
        .route("/scheduler/status", get(scheduler_status))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
}

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    if config.signature_disabled {
        warn!("webhook signature verification is DISABLED; do not run this in production");
    }
    let config = Arc::new(config);

    let database_path = config.database_path.clone();
    let store = Arc::new(
        task::spawn_blocking(move || ConversationStore::new(database_path))
            .await
            .map_err(|err| -> BoxError { err.into() })??,
    );

    let directory = match config.directory_path.clone() {
        Some(path) => {
            let store = store.clone();
            task::spawn_blocking(move || -> Result<DirectoryFile, BoxError> {
                let file = load_directory(&path)?;
                apply_directory(&store, &file, Utc::now())?;
                Ok(file)
            })
            .await
            .map_err(|err| -> BoxError { err.into() })??
        }
        None => {
            warn!("no directory file configured; using agents already in the store");
            DirectoryFile::default()
        }
    };

    let sanitizer = directory
        .disallowed_terms()
        .map(Sanitizer::new)
        .unwrap_or_default();
    // The completion client owns a blocking HTTP client; build it off the runtime.
    let completion = task::spawn_blocking(OpenAiCompletionClient::from_env)
        .await
        .map_err(|err| -> BoxError { err.into() })??;
    info!("agent replies use model {}", completion.model());
    let agent_core = AgentCore::new(Arc::new(completion), sanitizer);
    let transport: Arc<dyn MailTransport> = Arc::new(MailgunTransport::from_env()?);

    let engine = Arc::new(
        ConversationEngine::new(store.clone(), transport.clone(), agent_core)
            .with_url_triggers(directory.url_trigger_config())
            .with_history_limit(config.history_limit),
    );
    let scheduler = Arc::new(CampaignScheduler::new(store.clone(), transport));
    if config.scheduler_enabled {
        scheduler.start(&config.scheduler_cron)?;
    } else {
        info!("campaign scheduler disabled; use POST /scheduler/run to trigger runs");
    }

    let state = AppState::new(config.clone(), engine, scheduler.clone());

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("outreach service listening on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    task::spawn_blocking(move || scheduler.stop())
        .await
        .map_err(|err| -> BoxError { err.into() })?;
    serve_result?;
    Ok(())
}
