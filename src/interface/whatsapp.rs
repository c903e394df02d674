use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{AppState, APOLOGY};
use crate::{
    entity::Channel,
    error::ApiError,
    manager::Inbound,
    outbound::spawn_delivery,
    session::SessionKey,
};

// -----------------------------------------------------------------------------
// Graph API webhook payload (only the parts we read)
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    value: Option<ChangeValue>,
}

#[derive(Debug, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Deserialize)]
struct WhatsAppMessage {
    from: String,
    text: Option<TextBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

/// `GET /whatsapp-webhook`: subscription handshake.
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token");

    match (&state.whatsapp_verify_token, mode, token) {
        (Some(expected), Some("subscribe"), Some(token)) if token == expected => {
            info!("WhatsApp webhook subscription verified");
            let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!("WhatsApp webhook verification rejected (mode={:?})", mode);
            (StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
    }
}

/// `POST /whatsapp-webhook`: inbound message delivery.
///
/// The reply is not part of the HTTP response; it is pushed through the send
/// API in a background task.
pub async fn message_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Some((from, text)) = first_text_message(&body) else {
        debug!("WhatsApp webhook without a text message, nothing to do");
        return ok();
    };

    info!("WhatsApp message from {}: {}", from, text);

    let result = state
        .manager
        .handle(Inbound {
            channel: Channel::WhatsApp,
            user_id: from.clone(),
            session: SessionKey::Identity,
            language: None,
            text,
        })
        .await;

    match result {
        Ok(turn) => {
            spawn_delivery(
                state.sender.clone(),
                state.bus.clone(),
                Channel::WhatsApp,
                from,
                turn.reply.content,
            );
            debug!("Acknowledging WhatsApp webhook, reply queued");
            ok()
        }
        Err(e) => {
            spawn_delivery(
                state.sender.clone(),
                state.bus.clone(),
                Channel::WhatsApp,
                from,
                APOLOGY.to_string(),
            );
            ApiError::internal(e.to_string()).into_response()
        }
    }
}

/// Sender and text of entry[0].changes[0].value.messages[0], if present.
fn first_text_message(raw: &[u8]) -> Option<(String, String)> {
    let payload: WebhookPayload = serde_json::from_slice(raw).ok()?;
    let message = payload
        .entry
        .into_iter()
        .next()?
        .changes
        .into_iter()
        .next()?
        .value?
        .messages
        .into_iter()
        .next()?;
    let text = message.text?.body;
    if text.trim().is_empty() {
        return None;
    }
    Some((message.from, text))
}

fn ok() -> Response {
    (StatusCode::OK, "OK").into_response()
}
