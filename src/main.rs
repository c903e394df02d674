use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod bus;
mod chat;
mod completion;
mod config;
mod context;
mod entity;
mod error;
mod interface;
mod manager;
mod outbound;
mod session;
mod store;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Process environment wins over .env; a missing file is fine.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("MedAdvisor channel gateway starting...");
    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => debug!("No .env file, using process environment only"),
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }

    let config = config::Config::from_env().context("Failed to load configuration")?;

    if config.openai_api_key.is_none() {
        info!("OPENAI_API_KEY not set; every chat request will fail until it is configured.");
    }
    if config.whatsapp_verify_token.is_none() {
        info!("WHATSAPP_VERIFY_TOKEN not set; WhatsApp webhook verification will be refused.");
    }

    info!("Initializing store at {}", config.database_url);
    let store = store::Store::new(&config.database_url).await?;
    store.init().await?;

    let bus = Arc::new(bus::EventBus::new());
    let gateway = Arc::new(completion::OpenAiGateway::from_config(&config)?);
    let sender = Arc::new(outbound::GraphSender::from_config(&config)?);

    let state = Arc::new(interface::AppState {
        manager: manager::Manager::new(store, gateway, bus.clone()),
        sender,
        bus,
        whatsapp_verify_token: config.whatsapp_verify_token.clone(),
        sms_country_prefix: config.sms_country_prefix.clone(),
    });

    let app = interface::ChannelServer::new(state).router();

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, stopping channel gateway");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = &res {
                error!("Channel gateway server failed: {}", e);
            }
            res.context("HTTP server terminated")?;
        }
    }

    Ok(())
}
