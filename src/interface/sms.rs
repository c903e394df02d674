use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::{AppState, APOLOGY};
use crate::{
    entity::Channel,
    error::{ChatError, Result},
    manager::Inbound,
    session::SessionKey,
};

/// The two fields we use from a Twilio-style inbound SMS webhook.
#[derive(Debug, Default, Deserialize)]
pub struct SmsForm {
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
}

/// `POST /sms-webhook`. Always answers 200 with a TwiML envelope; failures
/// become the apology text.
pub async fn sms_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let reply = match answer(&state, &body).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("SMS webhook error: {}", e);
            APOLOGY.to_string()
        }
    };

    debug!("Responding with TwiML ({} chars)", reply.chars().count());
    twiml(&reply)
}

async fn answer(state: &AppState, raw: &[u8]) -> Result<String> {
    let form: SmsForm = serde_urlencoded::from_bytes(raw)
        .map_err(|e| ChatError::InvalidInput(format!("unreadable SMS form: {e}")))?;

    let (Some(from), Some(text)) = (form.from, form.body) else {
        return Err(ChatError::InvalidInput("SMS form is missing From or Body".into()));
    };
    if text.trim().is_empty() {
        return Err(ChatError::InvalidInput("SMS body is empty".into()));
    }

    info!("SMS from {}: {}", from, text);

    let turn = state
        .manager
        .handle(Inbound {
            channel: Channel::Sms,
            user_id: strip_country_prefix(&from, &state.sms_country_prefix),
            session: SessionKey::Identity,
            language: None,
            text,
        })
        .await?;

    Ok(turn.reply.content)
}

/// Session key for a sender: the number without the configured country code.
pub fn strip_country_prefix(from: &str, prefix: &str) -> String {
    let from = from.trim();
    from.strip_prefix(prefix).unwrap_or(from).to_string()
}

fn twiml(message: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n    <Message>{}</Message>\n</Response>",
        xml_escape(message)
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
