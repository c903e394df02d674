use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{bus::EventBus, manager::Manager, outbound::OutboundSender};

pub mod sms;
pub mod web;
pub mod whatsapp;

/// Sent to SMS and WhatsApp users when their message could not be answered.
pub const APOLOGY: &str = "Sorry, I'm having trouble right now. \
Please try again later or call emergency services if urgent.";

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct AppState {
    pub manager: Manager,
    pub sender: Arc<dyn OutboundSender>,
    pub bus: Arc<EventBus>,
    pub whatsapp_verify_token: Option<String>,
    pub sms_country_prefix: String,
}

// -----------------------------------------------------------------------------
// Implementation
// -----------------------------------------------------------------------------

pub struct ChannelServer {
    state: Arc<AppState>,
}

impl ChannelServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health-chatbot", post(web::chat_handler))
            .route("/sms-webhook", post(sms::sms_handler))
            .route(
                "/whatsapp-webhook",
                get(whatsapp::verify_handler).post(whatsapp::message_handler),
            )
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }
}
