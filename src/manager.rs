use crate::{
    bus::{Event, EventBus},
    chat::{ChatMessage, Session},
    completion::{bound_reply, CompletionGateway, DEFAULT_TEMPERATURE},
    context::ContextBuilder,
    entity::Channel,
    error::Result,
    session::{self, SessionKey},
    store::Store,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Progress of one inbound message through the pipeline.
///
/// Ends at `Persisted`; answering the user (JSON body, TwiML, or a Graph API
/// push) is left to the channel adapter, and a WhatsApp push reports its own
/// outcome as a `DeliveryReport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Received,
    SessionResolved,
    ContextBuilt,
    CompletionFetched,
    Persisted,
}

/// A user message as handed over by a channel adapter.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub channel: Channel,
    /// Web user id or (normalized) phone number.
    pub user_id: String,
    pub session: SessionKey,
    pub language: Option<String>,
    pub text: String,
}

/// Result of a completed turn: the session and the stored reply.
#[derive(Debug, Clone)]
pub struct Turn {
    pub session: Session,
    pub reply: ChatMessage,
}

/// Runs the shared session → context → completion → persist pipeline for all
/// channels.
pub struct Manager {
    store: Store,
    gateway: Arc<dyn CompletionGateway>,
    bus: Arc<EventBus>,
}

impl Manager {
    pub fn new(store: Store, gateway: Arc<dyn CompletionGateway>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            gateway,
            bus,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Handle one inbound message. Nothing is written unless the completion
    /// succeeds, and then both rows are written together.
    pub async fn handle(&self, inbound: Inbound) -> Result<Turn> {
        let mut stage = Stage::Received;
        let result = self.run(&inbound, &mut stage).await;

        if let Err(e) = &result {
            warn!(
                "{} turn for {} failed after {:?}: {}",
                inbound.channel, inbound.user_id, stage, e
            );
            self.bus.publish(Event::TurnFailed {
                channel: inbound.channel,
                reached: stage,
                error: e.to_string(),
            });
        }

        result
    }

    async fn run(&self, inbound: &Inbound, stage: &mut Stage) -> Result<Turn> {
        let received_at = Utc::now();
        let policy = inbound.channel.policy();

        let session = session::resolve(
            &self.store,
            inbound.channel,
            &inbound.user_id,
            &inbound.session,
            inbound.language.as_deref(),
        )
        .await?;
        *stage = Stage::SessionResolved;
        debug!("Resolved session {} ({:?})", session.id, stage);

        let language = inbound.language.as_deref().unwrap_or(&session.language);
        let turns = ContextBuilder::new(&self.store)
            .build(&session, &inbound.user_id, language, &inbound.text)
            .await?;
        *stage = Stage::ContextBuilt;
        debug!("Built prompt with {} turns ({:?})", turns.len(), stage);

        let completion = self
            .gateway
            .complete(&turns, policy.max_tokens, DEFAULT_TEMPERATURE)
            .await?;
        let completion = bound_reply(completion, policy.reply_limit);
        *stage = Stage::CompletionFetched;

        let (_, reply) = self
            .store
            .save_exchange(
                &session.id,
                (&inbound.text, received_at),
                (&completion, Utc::now()),
            )
            .await?;
        *stage = Stage::Persisted;
        debug!("Persisted turn for session {} ({:?})", session.id, stage);

        Ok(Turn { session, reply })
    }
}
