//! Fakes and fixtures shared by the unit tests.

use crate::{
    bus::EventBus,
    chat::PromptTurn,
    completion::CompletionGateway,
    error::{ChatError, Result},
    interface::{AppState, ChannelServer},
    manager::Manager,
    outbound::OutboundSender,
    store::Store,
};
use async_trait::async_trait;
use axum::Router;
use http_body_util::BodyExt;
use std::sync::{Arc, Mutex};

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Debug, Clone)]
pub struct GatewayCall {
    pub turns: Vec<PromptTurn>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Completion gateway that returns a fixed reply (or always fails) and
/// records every request.
pub struct ScriptedGateway {
    reply: Option<String>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl ScriptedGateway {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Mutex::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn complete(
        &self,
        turns: &[PromptTurn],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(GatewayCall {
            turns: turns.to_vec(),
            max_tokens,
            temperature,
        });
        self.reply
            .clone()
            .ok_or_else(|| ChatError::Upstream("status 500".into()))
    }
}

#[derive(Default)]
pub struct RecordingSender {
    fail: bool,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::default(),
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundSender for RecordingSender {
    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        if self.fail {
            return Err(ChatError::Delivery("Graph API 500".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub gateway: Arc<ScriptedGateway>,
    pub sender: Arc<RecordingSender>,
    pub bus: Arc<EventBus>,
}

impl Harness {
    pub async fn new(gateway: ScriptedGateway) -> Self {
        Self::with_sender(gateway, RecordingSender::default()).await
    }

    pub async fn with_sender(gateway: ScriptedGateway, sender: RecordingSender) -> Self {
        Self::build(gateway, sender, Some("verify-me".into())).await
    }

    pub async fn build(
        gateway: ScriptedGateway,
        sender: RecordingSender,
        verify_token: Option<String>,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let sender = Arc::new(sender);
        let bus = Arc::new(EventBus::new());
        let store = Store::in_memory().await;

        let state = Arc::new(AppState {
            manager: Manager::new(store, gateway.clone(), bus.clone()),
            sender: sender.clone(),
            bus: bus.clone(),
            whatsapp_verify_token: verify_token,
            sms_country_prefix: "+1".into(),
        });

        Self {
            state,
            gateway,
            sender,
            bus,
        }
    }

    pub fn store(&self) -> &Store {
        self.state.manager.store()
    }

    pub fn router(&self) -> Router {
        ChannelServer::new(self.state.clone()).router()
    }
}

pub async fn body_text(body: axum::body::Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(body: axum::body::Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
