use crate::{
    chat::{Session, DEFAULT_LANGUAGE},
    entity::Channel,
    error::{ChatError, Result},
    store::Store,
};
use tracing::{debug, info, warn};

/// How an inbound message names its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKey {
    /// Look up (or create) by channel and external user id.
    Identity,
    /// A web client chaining onto a session it was handed earlier. Fetched by
    /// primary key; ownership is not re-checked, but the session must belong
    /// to the same channel.
    Existing(String),
}

/// Find or create the session an inbound message belongs to.
///
/// SMS and WhatsApp user ids are raw phone numbers and never linked to a web
/// identity; the three channels are disjoint keyspaces.
pub async fn resolve(
    store: &Store,
    channel: Channel,
    user_id: &str,
    key: &SessionKey,
    language: Option<&str>,
) -> Result<Session> {
    match key {
        SessionKey::Existing(id) => {
            debug!("Fetching {} session {}", channel, id);
            match store.get_session(id).await? {
                Some(session) if session.channel == channel => Ok(session),
                Some(session) => {
                    warn!(
                        "Session {} belongs to {}, not {}; treating as unknown",
                        id, session.channel, channel
                    );
                    Err(ChatError::SessionNotFound(id.clone()))
                }
                None => Err(ChatError::SessionNotFound(id.clone())),
            }
        }
        SessionKey::Identity => {
            let language = language.unwrap_or(DEFAULT_LANGUAGE);
            let (session, created) = store
                .get_or_create_session(channel, user_id, language)
                .await?;
            if created {
                info!("Created {} session {} for {}", channel, session.id, user_id);
            }
            Ok(session)
        }
    }
}
