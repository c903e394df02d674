use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport a conversation arrives on. Stored as `session_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Web,
    Sms,
    WhatsApp,
}

/// Per-channel limits applied by the context builder and completion gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPolicy {
    /// Most recent messages read from the store.
    pub history_fetch: i64,
    /// How many of the fetched messages make it into the prompt.
    pub history_keep: usize,
    pub max_tokens: u32,
    /// Hard cap on reply length in characters.
    pub reply_limit: Option<usize>,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::Sms => "sms",
            Channel::WhatsApp => "whatsapp",
        }
    }

    pub fn policy(&self) -> ChannelPolicy {
        match self {
            Channel::Web => ChannelPolicy {
                history_fetch: 10,
                history_keep: 10,
                max_tokens: 1000,
                reply_limit: None,
            },
            Channel::Sms => ChannelPolicy {
                history_fetch: 5,
                history_keep: 3,
                max_tokens: 50,
                reply_limit: Some(160),
            },
            Channel::WhatsApp => ChannelPolicy {
                history_fetch: 10,
                history_keep: 10,
                max_tokens: 150,
                reply_limit: None,
            },
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(Channel::Web),
            "sms" => Ok(Channel::Sms),
            "whatsapp" => Ok(Channel::WhatsApp),
            other => Err(format!("unknown session type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

// Read-only health data owned by the dashboard side of the product.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub full_name: Option<String>,
    pub gender: Option<String>,
    pub blood_group: Option<String>,
    pub preferred_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: String,
    pub user_id: String,
    pub condition_name: String,
    #[serde(default)]
    pub allergies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAlert {
    pub id: String,
    pub title: String,
    pub content: String,
}
