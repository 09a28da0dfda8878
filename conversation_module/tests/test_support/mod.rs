#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use agent_reply_module::{
    AgentCore, CompletionClient, CompletionError, CompletionRequest, Sanitizer,
};
use chrono::{DateTime, Utc};
use conversation_module::engine::ConversationEngine;
use conversation_module::models::{Agent, Campaign, CampaignStatus, CampaignStep, NewLead};
use conversation_module::outbound::{MailTransport, OutboundEmail, TransportError};
use conversation_module::store::ConversationStore;
use tempfile::TempDir;

pub const AGENT_DOMAIN: &str = "mg.dealer.com";

/// Records every outbound email. Can be switched to fail, or to block the
/// first send until the test releases it.
#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    fail: AtomicBool,
    gate: Mutex<Option<Arc<SendGate>>>,
}

pub struct SendGate {
    entered: Barrier,
    release: Barrier,
}

impl SendGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        })
    }

    /// Blocks until a send is parked on the gate.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    pub fn release(&self) {
        self.release.wait();
    }
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn block_next_send(&self, gate: Arc<SendGate>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl MailTransport for FakeTransport {
    fn send(&self, email: &OutboundEmail) -> Result<String, TransportError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.wait();
            gate.release.wait();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("mailbox unavailable".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("<provider-{}@{}>", sent.len(), AGENT_DOMAIN))
    }
}

/// Plays back queued completion results, then a default plain reply.
#[derive(Default)]
pub struct ScriptedCompletion {
    script: Mutex<VecDeque<Result<String, CompletionError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_raw(&self, raw: &str) {
        self.script.lock().unwrap().push_back(Ok(raw.to_string()));
    }

    pub fn push_reply(&self, reply: &str, handover: bool, reason: &str) {
        let raw = serde_json::json!({
            "reply": reply,
            "handover": handover,
            "reason": reason,
        })
        .to_string();
        self.push_raw(&raw);
    }

    pub fn push_error(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(CompletionError::EmptyResponse));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(r#"{"reply":"Happy to help with that.","handover":false,"reason":"answered"}"#
                .to_string())
        })
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub store: Arc<ConversationStore>,
    pub transport: Arc<FakeTransport>,
    pub completion: Arc<ScriptedCompletion>,
    pub engine: Arc<ConversationEngine>,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let store = Arc::new(ConversationStore::new(temp.path().join("outreach.db")).expect("store"));
        seed_agent(&store);
        let transport = FakeTransport::new();
        let completion = ScriptedCompletion::new();
        let agent_core = AgentCore::new(completion.clone(), Sanitizer::default());
        let engine = Arc::new(ConversationEngine::new(
            store.clone(),
            transport.clone(),
            agent_core,
        ));
        Self {
            temp,
            store,
            transport,
            completion,
            engine,
        }
    }
}

pub fn seed_agent(store: &ConversationStore) -> Agent {
    let mut variables = BTreeMap::new();
    variables.insert("dealership".to_string(), "Riverside Motors".to_string());
    variables.insert("role".to_string(), "sales consultant".to_string());
    let agent = Agent {
        id: "sarah".to_string(),
        display_name: "Sarah Lee".to_string(),
        domain: AGENT_DOMAIN.to_string(),
        local_part: "sarah".to_string(),
        prompt_template: "You are {{agent_name}}, a {{role}} at {{dealership}}.".to_string(),
        variables,
    };
    store.upsert_agent(&agent).expect("agent");
    agent
}

pub fn seed_campaign(
    store: &ConversationStore,
    offsets: &[i64],
    leads: &[&str],
    started_at: DateTime<Utc>,
) -> Campaign {
    let campaign = Campaign {
        id: "spring".to_string(),
        agent_id: "sarah".to_string(),
        name: "Spring Event".to_string(),
        status: CampaignStatus::Active,
        steps: offsets
            .iter()
            .enumerate()
            .map(|(index, offset)| CampaignStep {
                offset_days: *offset,
                subject: if index == 0 {
                    "Spring event at {{dealership}}".to_string()
                } else {
                    String::new()
                },
                template: format!("Hi {{{{lead_name}}}}, step {{{{step_number}}}} of {}.", offsets.len()),
            })
            .collect(),
    };
    store.upsert_campaign(&campaign).expect("campaign");
    for email in leads {
        store
            .insert_lead(&NewLead {
                campaign_id: campaign.id.clone(),
                agent_id: campaign.agent_id.clone(),
                email: email.to_string(),
                name: None,
                started_at,
            })
            .expect("lead");
    }
    campaign
}
