use crate::{
    bus::{DeliveryOutcome, DeliveryReport, Event, EventBus},
    config::Config,
    entity::Channel,
    error::{ChatError, Result},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pushes a reply to a user outside the inbound request/response cycle.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<()>;
}

/// WhatsApp Cloud API: `POST {graph_url}/{phone_number_id}/messages`.
pub struct GraphSender {
    client: reqwest::Client,
    graph_url: String,
    access_token: Option<String>,
    phone_number_id: Option<String>,
}

impl GraphSender {
    pub fn new(
        graph_url: impl Into<String>,
        access_token: Option<String>,
        phone_number_id: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            graph_url: graph_url.into(),
            access_token,
            phone_number_id,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.whatsapp_graph_url.clone(),
            config.whatsapp_access_token.clone(),
            config.whatsapp_phone_number_id.clone(),
        )
    }
}

#[async_trait]
impl OutboundSender for GraphSender {
    async fn send_text(&self, to: &str, body: &str) -> Result<()> {
        let (Some(token), Some(phone_number_id)) = (&self.access_token, &self.phone_number_id)
        else {
            return Err(ChatError::Config(
                "WHATSAPP_ACCESS_TOKEN and WHATSAPP_PHONE_NUMBER_ID must both be set".into(),
            ));
        };

        let url = format!(
            "{}/{}/messages",
            self.graph_url.trim_end_matches('/'),
            phone_number_id
        );
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "text": { "body": body },
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ChatError::Delivery(format!("Graph API {status}: {text}")));
        }

        Ok(())
    }
}

/// Send `body` to `to` in the background. The inbound request does not wait
/// for it; the outcome is published on the bus as a [`DeliveryReport`].
pub fn spawn_delivery(
    sender: Arc<dyn OutboundSender>,
    bus: Arc<EventBus>,
    channel: Channel,
    to: String,
    body: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = match sender.send_text(&to, &body).await {
            Ok(()) => {
                info!("Delivered {} reply to {}", channel, to);
                DeliveryOutcome::Sent
            }
            Err(e) => {
                warn!("Failed to deliver {} reply to {}: {}", channel, to, e);
                DeliveryOutcome::Failed(e.to_string())
            }
        };

        bus.publish(Event::Delivery(DeliveryReport {
            channel,
            to,
            outcome,
        }));
    })
}
