use crate::error::{ChatError, Result};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v17.0";
pub const DEFAULT_SMS_COUNTRY_PREFIX: &str = "+1";

/// Process configuration, read once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub whatsapp_verify_token: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_graph_url: String,
    pub sms_country_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL")
            .ok_or_else(|| ChatError::Config("DATABASE_URL is not set".into()))?;

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            database_url,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
            whatsapp_verify_token: get("WHATSAPP_VERIFY_TOKEN"),
            whatsapp_access_token: get("WHATSAPP_ACCESS_TOKEN"),
            whatsapp_phone_number_id: get("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_graph_url: get("WHATSAPP_GRAPH_URL")
                .unwrap_or_else(|| DEFAULT_GRAPH_URL.into()),
            sms_country_prefix: get("SMS_COUNTRY_PREFIX")
                .unwrap_or_else(|| DEFAULT_SMS_COUNTRY_PREFIX.into()),
        })
    }
}
