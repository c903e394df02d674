use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::AppState;
use crate::{
    entity::Channel,
    error::{ApiError, ChatError},
    manager::Inbound,
    session::SessionKey,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebChatResponse {
    pub message: String,
    pub session_id: String,
}

/// `POST /health-chatbot`
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WebChatRequest>, JsonRejection>,
) -> Result<Json<WebChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    if request.message.trim().is_empty() {
        return Err(ChatError::InvalidInput("message must not be empty".into()).into());
    }

    info!(
        "Web chat from {} (session {:?})",
        request.user_id, request.session_id
    );

    let session = match request.session_id {
        Some(id) if !id.is_empty() => SessionKey::Existing(id),
        _ => SessionKey::Identity,
    };

    let turn = state
        .manager
        .handle(Inbound {
            channel: Channel::Web,
            user_id: request.user_id,
            session,
            language: request.language,
            text: request.message,
        })
        .await?;

    debug!("Responding to web session {}", turn.session.id);

    Ok(Json(WebChatResponse {
        message: turn.reply.content,
        session_id: turn.session.id,
    }))
}

#[cfg(test)]
mod tests {
    use crate::entity::Role;
    use crate::test_support::{body_json, Harness, ScriptedGateway};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/health-chatbot")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_conversation_returns_session_and_persists_turn() {
        let harness = Harness::new(ScriptedGateway::replying("BCG at birth, then DPT at 6 weeks.")).await;

        let resp = harness
            .router()
            .oneshot(post_json(json!({"message": "vaccination schedule", "userId": "u1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp.into_body()).await;
        assert_eq!(body["message"], "BCG at birth, then DPT at 6 weeks.");
        let session_id = body["sessionId"].as_str().unwrap();
        assert!(!session_id.is_empty());

        let rows = harness.store().all_messages(session_id).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].role, Role::User);
        assert_eq!(rows[0].content, "vaccination schedule");
        assert_eq!(rows[1].role, Role::Assistant);
        assert_eq!(rows[1].content, "BCG at birth, then DPT at 6 weeks.");

        let session = harness.store().get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.user_id, "u1");
        assert_eq!(session.language, "english");
    }

    #[tokio::test]
    async fn test_chaining_with_session_id_continues_conversation() {
        let harness = Harness::new(ScriptedGateway::replying("noted")).await;

        let resp = harness
            .router()
            .oneshot(post_json(json!({"message": "first", "userId": "u1", "language": "tamil"})))
            .await
            .unwrap();
        let session_id = body_json(resp.into_body()).await["sessionId"]
            .as_str()
            .unwrap()
            .to_string();

        let resp = harness
            .router()
            .oneshot(post_json(
                json!({"message": "second", "userId": "u1", "sessionId": session_id}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.into_body()).await["sessionId"], session_id.as_str());

        assert_eq!(harness.store().all_messages(&session_id).await.len(), 4);
        let calls = harness.gateway.calls();
        // system + 2 history rows + new message
        assert_eq!(calls[1].turns.len(), 4);
        assert_eq!(calls[1].max_tokens, 1000);
        // The session keeps the language it was created with.
        assert!(calls[1].turns[0].content.contains("currently in tamil"));
    }

    #[tokio::test]
    async fn test_unknown_session_id_is_404() {
        let harness = Harness::new(ScriptedGateway::replying("unused")).await;

        let resp = harness
            .router()
            .oneshot(post_json(
                json!({"message": "hi", "userId": "u1", "sessionId": "no-such-session"}),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("no-such-session"));
        assert!(harness.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sms_session_id_is_404_on_web() {
        let harness = Harness::new(ScriptedGateway::replying("unused")).await;
        let (sms, _) = harness
            .store()
            .get_or_create_session(crate::entity::Channel::Sms, "5551234567", "english")
            .await
            .unwrap();

        let resp = harness
            .router()
            .oneshot(post_json(
                json!({"message": "hi", "userId": "u1", "sessionId": sms.id}),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(harness.gateway.calls().is_empty());
        assert!(harness.store().all_messages(&sms.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_400_with_error_payload() {
        let harness = Harness::new(ScriptedGateway::replying("unused")).await;

        let req = Request::builder()
            .method("POST")
            .uri("/health-chatbot")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = harness.router().oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp.into_body()).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_missing_user_id_is_400() {
        let harness = Harness::new(ScriptedGateway::replying("unused")).await;

        let resp = harness
            .router()
            .oneshot(post_json(json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_blank_message_is_400() {
        let harness = Harness::new(ScriptedGateway::replying("unused")).await;

        let resp = harness
            .router()
            .oneshot(post_json(json!({"message": "   ", "userId": "u1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(harness.store().count_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_completion_failure_is_500_and_persists_nothing() {
        let harness = Harness::new(ScriptedGateway::failing()).await;

        let resp = harness
            .router()
            .oneshot(post_json(json!({"message": "hello", "userId": "u1"})))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("Completion API error"));

        let (session, _) = harness
            .store()
            .get_or_create_session(crate::entity::Channel::Web, "u1", "english")
            .await
            .unwrap();
        assert!(harness.store().all_messages(&session.id).await.is_empty());
    }
}
