use std::sync::Arc;

use crate::campaign::CampaignScheduler;
use crate::engine::ConversationEngine;
use crate::store::ConversationStore;

use super::config::ServiceConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub engine: Arc<ConversationEngine>,
    pub scheduler: Arc<CampaignScheduler>,
}

impl AppState {
    pub fn new(
        config: Arc<ServiceConfig>,
        engine: Arc<ConversationEngine>,
        scheduler: Arc<CampaignScheduler>,
    ) -> Self {
        Self {
            config,
            engine,
            scheduler,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        self.engine.store()
    }
}
