use crate::{
    chat::{ChatMessage, Session},
    entity::{Channel, HealthAlert, HealthRecord, Profile, Role},
    error::Result,
};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    ConnectOptions, Row, SqlitePool,
};
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, user_id, session_type, language, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the conversation database.
    /// File databases are created if they don't exist yet.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        // An in-memory database lives only as long as its connection.
        let mut pool_options = SqlitePoolOptions::new();
        if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    ///
    /// Fails if `chat_sessions` already holds more than one row for the same
    /// (session_type, user_id); those must be merged before the unique index
    /// can be built.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_type TEXT NOT NULL,
                language TEXT NOT NULL DEFAULT 'english',
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_sessions_channel_user
                ON chat_sessions(session_type, user_id);

            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                message_type TEXT NOT NULL DEFAULT 'text',
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_messages_session_created
                ON chat_messages(session_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                full_name TEXT,
                gender TEXT,
                blood_group TEXT,
                preferred_language TEXT
            );

            CREATE TABLE IF NOT EXISTS health_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                condition_name TEXT NOT NULL,
                allergies TEXT,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_health_records_user ON health_records(user_id);

            CREATE TABLE IF NOT EXISTS health_alerts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                published_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Return the session for (channel, user_id), creating it if needed.
    ///
    /// The insert is a no-op when the key already exists, so concurrent first
    /// messages converge on a single row. The flag is true when this call
    /// created the session.
    pub async fn get_or_create_session(
        &self,
        channel: Channel,
        user_id: &str,
        language: &str,
    ) -> Result<(Session, bool)> {
        let now = timestamp(&Utc::now());

        let created = sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, user_id, session_type, language, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_type, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(channel.as_str())
        .bind(language)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions
             WHERE session_type = ? AND user_id = ?
             ORDER BY created_at ASC, rowid ASC
             LIMIT 1"
        ))
        .bind(channel.as_str())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((session_from_row(&row)?, created))
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// The `limit` most recent messages of a session, oldest first.
    pub async fn recent_messages(&self, session_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, role, content, message_type, created_at
            FROM chat_messages
            WHERE session_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;

        // Return in chronological order (oldest -> newest)
        messages.reverse();

        Ok(messages)
    }

    /// Persist one user turn and its reply atomically, and bump the session's
    /// `updated_at`.
    pub async fn save_exchange(
        &self,
        session_id: &str,
        user: (&str, DateTime<Utc>),
        assistant: (&str, DateTime<Utc>),
    ) -> Result<(ChatMessage, ChatMessage)> {
        let user_msg = new_message(session_id, Role::User, user.0, user.1);
        let assistant_msg = new_message(session_id, Role::Assistant, assistant.0, assistant.1);

        let mut tx = self.pool.begin().await?;

        for msg in [&user_msg, &assistant_msg] {
            sqlx::query(
                r#"
                INSERT INTO chat_messages (id, session_id, role, content, message_type, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&msg.id)
            .bind(&msg.session_id)
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .bind(&msg.message_type)
            .bind(timestamp(&msg.created_at))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(timestamp(&assistant_msg.created_at))
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((user_msg, assistant_msg))
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, full_name, gender, blood_group, preferred_language
            FROM profiles
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Profile {
            user_id: row.try_get("user_id")?,
            full_name: row.try_get("full_name")?,
            gender: row.try_get("gender")?,
            blood_group: row.try_get("blood_group")?,
            preferred_language: row.try_get("preferred_language")?,
        }))
    }

    pub async fn get_health_records(&self, user_id: &str) -> Result<Vec<HealthRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, condition_name, allergies
            FROM health_records
            WHERE user_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            // Allergies are a JSON array of strings; tolerate junk written by other tools.
            let allergies = match row.try_get::<Option<String>, _>("allergies")? {
                Some(raw) => serde_json::from_str::<Vec<String>>(&raw).unwrap_or_else(|e| {
                    warn!("Ignoring unreadable allergies on health record {}: {}", id, e);
                    Vec::new()
                }),
                None => Vec::new(),
            };
            records.push(HealthRecord {
                id,
                user_id: row.try_get("user_id")?,
                condition_name: row.try_get("condition_name")?,
                allergies,
            });
        }

        Ok(records)
    }

    /// Newest active alerts first.
    pub async fn get_active_alerts(&self, limit: i64) -> Result<Vec<HealthAlert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, content
            FROM health_alerts
            WHERE is_active = 1
            ORDER BY published_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<HealthAlert> {
                Ok(HealthAlert {
                    id: row.try_get("id")?,
                    title: row.try_get("title")?,
                    content: row.try_get("content")?,
                })
            })
            .collect()
    }
}

/// Fixed-width RFC 3339 so that text ordering in SQLite is chronological.
fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn new_message(session_id: &str, role: Role, content: &str, at: DateTime<Utc>) -> ChatMessage {
    ChatMessage {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        role,
        content: content.to_string(),
        message_type: "text".to_string(),
        created_at: at,
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let session_type: String = row.try_get("session_type")?;
    let channel = session_type
        .parse::<Channel>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        channel,
        language: row.try_get("language")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let role: String = row.try_get("role")?;
    let role = role
        .parse::<Role>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(ChatMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role,
        content: row.try_get("content")?,
        message_type: row.try_get("message_type")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
impl Store {
    pub async fn in_memory() -> Self {
        let store = Store::new("sqlite::memory:").await.unwrap();
        store.init().await.unwrap();
        store
    }

    pub async fn all_messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.recent_messages(session_id, -1).await.unwrap()
    }

    pub async fn count_sessions(&self) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM chat_sessions")
            .fetch_one(&self.pool)
            .await
            .unwrap()
            .get("n")
    }

    pub async fn seed_profile(&self, profile: &Profile) {
        sqlx::query(
            "INSERT INTO profiles (user_id, full_name, gender, blood_group, preferred_language)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&profile.user_id)
        .bind(&profile.full_name)
        .bind(&profile.gender)
        .bind(&profile.blood_group)
        .bind(&profile.preferred_language)
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn seed_health_record(&self, user_id: &str, condition: &str, allergies: &[&str]) {
        sqlx::query(
            "INSERT INTO health_records (id, user_id, condition_name, allergies) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(condition)
        .bind(serde_json::to_string(allergies).unwrap())
        .execute(&self.pool)
        .await
        .unwrap();
    }

    pub async fn seed_alert(&self, title: &str, content: &str, active: bool) {
        sqlx::query("INSERT INTO health_alerts (id, title, content, is_active) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(title)
            .bind(content)
            .bind(active)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    /// Insert alternating user/assistant messages one second apart.
    pub async fn seed_history(&self, session_id: &str, count: usize) {
        let start = Utc::now() - chrono::Duration::hours(1);
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            let msg = new_message(
                session_id,
                role,
                &format!("message {i}"),
                start + chrono::Duration::seconds(i as i64),
            );
            sqlx::query(
                "INSERT INTO chat_messages (id, session_id, role, content, message_type, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&msg.id)
            .bind(&msg.session_id)
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .bind(&msg.message_type)
            .bind(timestamp(&msg.created_at))
            .execute(&self.pool)
            .await
            .unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = Store::in_memory().await;

        let (first, created) = store
            .get_or_create_session(Channel::Sms, "5551234567", "english")
            .await
            .unwrap();
        assert!(created);

        let (second, created_again) = store
            .get_or_create_session(Channel::Sms, "5551234567", "hindi")
            .await
            .unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        // Existing sessions are returned unchanged.
        assert_eq!(second.language, "english");
        assert_eq!(store.count_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_same_user_on_different_channels_gets_separate_sessions() {
        let store = Store::in_memory().await;

        let (sms, _) = store
            .get_or_create_session(Channel::Sms, "5551234567", "english")
            .await
            .unwrap();
        let (wa, _) = store
            .get_or_create_session(Channel::WhatsApp, "5551234567", "english")
            .await
            .unwrap();

        assert_ne!(sms.id, wa.id);
        assert_eq!(wa.channel, Channel::WhatsApp);
        assert_eq!(store.count_sessions().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_messages_share_one_session() {
        let store = Store::in_memory().await;

        let (a, b) = tokio::join!(
            store.get_or_create_session(Channel::WhatsApp, "4477001", "english"),
            store.get_or_create_session(Channel::WhatsApp, "4477001", "english"),
        );

        assert_eq!(a.unwrap().0.id, b.unwrap().0.id);
        assert_eq!(store.count_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_get_session_by_id() {
        let store = Store::in_memory().await;
        let (session, _) = store
            .get_or_create_session(Channel::Web, "u1", "swahili")
            .await
            .unwrap();

        let fetched = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, "u1");
        assert_eq!(fetched.language, "swahili");
        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_messages_returns_latest_window_oldest_first() {
        let store = Store::in_memory().await;
        let (session, _) = store
            .get_or_create_session(Channel::Web, "u1", "english")
            .await
            .unwrap();
        store.seed_history(&session.id, 20).await;

        let window = store.recent_messages(&session.id, 10).await.unwrap();
        let contents: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (10..20).map(|i| format!("message {i}")).collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_save_exchange_orders_user_before_assistant() {
        let store = Store::in_memory().await;
        let (session, _) = store
            .get_or_create_session(Channel::Web, "u1", "english")
            .await
            .unwrap();

        // Same timestamp on both rows: insertion order breaks the tie.
        let at = Utc::now();
        store
            .save_exchange(&session.id, ("hello", at), ("hi there", at))
            .await
            .unwrap();
        store
            .save_exchange(&session.id, ("again", Utc::now()), ("sure", Utc::now()))
            .await
            .unwrap();

        let messages = store.all_messages(&session.id).await;
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[3].content, "sure");
        assert!(messages.iter().all(|m| m.message_type == "text"));

        let refreshed = store.get_session(&session.id).await.unwrap().unwrap();
        assert!(refreshed.updated_at >= session.updated_at);
    }

    #[tokio::test]
    async fn test_health_context_reads() {
        let store = Store::in_memory().await;
        store
            .seed_profile(&Profile {
                user_id: "u1".into(),
                full_name: Some("Asha Devi".into()),
                gender: Some("female".into()),
                blood_group: Some("B+".into()),
                preferred_language: None,
            })
            .await;
        store.seed_health_record("u1", "Asthma", &["pollen", "dust"]).await;
        store.seed_health_record("u1", "Diabetes", &[]).await;
        store.seed_health_record("u2", "Migraine", &["aspirin"]).await;
        store.seed_alert("Dengue", "Remove standing water", true).await;
        store.seed_alert("Old alert", "Expired", false).await;

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.blood_group.as_deref(), Some("B+"));
        assert!(store.get_profile("nobody").await.unwrap().is_none());

        let records = store.get_health_records("u1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].condition_name, "Asthma");
        assert_eq!(records[0].allergies, vec!["pollen", "dust"]);
        assert!(records[1].allergies.is_empty());

        let alerts = store.get_active_alerts(5).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "Dengue");
    }
}
