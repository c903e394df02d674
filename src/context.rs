//! Prompt assembly: system instruction, sliding history window, latest turn.
//!
//! User text is forwarded verbatim, both the new message and stored history.
//! Nothing here defends against prompt injection; the model sees whatever the
//! sender wrote.

use crate::{
    chat::{ChatMessage, PromptTurn, Session},
    entity::{Channel, HealthAlert, HealthRecord, Profile},
    error::Result,
    store::Store,
};

/// Active alerts injected into the web instruction.
pub const ACTIVE_ALERT_LIMIT: i64 = 5;

const SMS_INSTRUCTION: &str = "You are MedAdvisor, an AI health assistant for SMS. \
Keep responses VERY short (under 160 characters). Provide essential health guidance only. \
Always suggest consulting doctors for serious issues. \
Use simple language suitable for rural communities.";

const WHATSAPP_INSTRUCTION: &str = "You are MedAdvisor, an AI-powered public health chatbot for WhatsApp. \
Provide concise, helpful health guidance. \
Keep responses under 160 characters when possible for SMS compatibility. \
Always recommend consulting healthcare professionals for serious symptoms.";

/// Per-user data interpolated into the web instruction.
#[derive(Debug, Clone, Default)]
pub struct HealthContext {
    pub profile: Option<Profile>,
    pub records: Vec<HealthRecord>,
    pub alerts: Vec<HealthAlert>,
}

pub struct ContextBuilder<'a> {
    store: &'a Store,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Build the full message list for one completion call.
    ///
    /// `profile_owner` is the authenticated web user whose health data is
    /// injected; it is ignored on the phone channels.
    pub async fn build(
        &self,
        session: &Session,
        profile_owner: &str,
        language: &str,
        latest: &str,
    ) -> Result<Vec<PromptTurn>> {
        let policy = session.channel.policy();
        let history = self
            .store
            .recent_messages(&session.id, policy.history_fetch)
            .await?;

        let instruction = match session.channel {
            Channel::Web => {
                let health = self.load_health_context(profile_owner).await?;
                web_instruction(language, &health)
            }
            Channel::Sms => SMS_INSTRUCTION.to_string(),
            Channel::WhatsApp => WHATSAPP_INSTRUCTION.to_string(),
        };

        Ok(assemble(instruction, &history, policy.history_keep, latest))
    }

    async fn load_health_context(&self, user_id: &str) -> Result<HealthContext> {
        Ok(HealthContext {
            profile: self.store.get_profile(user_id).await?,
            records: self.store.get_health_records(user_id).await?,
            alerts: self.store.get_active_alerts(ACTIVE_ALERT_LIMIT).await?,
        })
    }
}

/// System turn, then the last `keep` history messages, then the new user turn.
pub fn assemble(
    instruction: String,
    history: &[ChatMessage],
    keep: usize,
    latest: &str,
) -> Vec<PromptTurn> {
    let window = &history[history.len().saturating_sub(keep)..];

    let mut turns = Vec::with_capacity(window.len() + 2);
    turns.push(PromptTurn::system(instruction));
    turns.extend(window.iter().map(PromptTurn::from));
    turns.push(PromptTurn::user(latest));
    turns
}

pub fn web_instruction(language: &str, health: &HealthContext) -> String {
    let profile = match &health.profile {
        Some(p) => format!(
            "Name: {}, Gender: {}, Blood Group: {}",
            p.full_name.as_deref().unwrap_or("unknown"),
            p.gender.as_deref().unwrap_or("unknown"),
            p.blood_group.as_deref().unwrap_or("unknown"),
        ),
        None => "No profile data".to_string(),
    };

    let conditions = or_none_recorded(
        health
            .records
            .iter()
            .map(|r| r.condition_name.as_str())
            .collect(),
    );
    let allergies = or_none_recorded(
        health
            .records
            .iter()
            .flat_map(|r| r.allergies.iter().map(String::as_str))
            .collect(),
    );

    let alerts = if health.alerts.is_empty() {
        "No active alerts".to_string()
    } else {
        health
            .alerts
            .iter()
            .map(|a| format!("- {}: {}", a.title, a.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are MedAdvisor, an AI-powered public health chatbot designed to provide healthcare guidance and disease awareness. Your responses should be:

1. ACCURATE and based on medical knowledge
2. CULTURALLY SENSITIVE and appropriate for rural/semi-urban communities
3. SUPPORTIVE and empathetic
4. CLEAR and easy to understand
5. MULTILINGUAL when requested (currently in {language})

USER CONTEXT:
- User Profile: {profile}
- Health Conditions: {conditions}
- Allergies: {allergies}

CURRENT HEALTH ALERTS:
{alerts}

IMPORTANT GUIDELINES:
- Always recommend consulting healthcare professionals for serious symptoms
- Provide preventive care advice
- Suggest vaccination schedules when appropriate
- Be supportive about mental health
- If asked about emergency situations, provide emergency contacts
- Never diagnose conditions - only provide general health guidance
- Encourage users to maintain their health records

Remember: You are NOT a replacement for professional medical care. Always encourage users to consult healthcare professionals for serious concerns."
    )
}

fn or_none_recorded(items: Vec<&str>) -> String {
    if items.is_empty() {
        "None recorded".to_string()
    } else {
        items.join(", ")
    }
}
