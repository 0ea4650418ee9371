//! Row types and small value objects shared by the `store` submodules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{message_embedding, messages, sessions, summary};

/// Closed set of message role types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    #[serde(rename = "norole")]
    NoRole,
    System,
    Assistant,
    User,
    Function,
    Tool,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::NoRole => "norole",
            RoleType::System => "system",
            RoleType::Assistant => "assistant",
            RoleType::User => "user",
            RoleType::Function => "function",
            RoleType::Tool => "tool",
        }
    }

    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "system" => RoleType::System,
            "assistant" => RoleType::Assistant,
            "user" => RoleType::User,
            "function" => RoleType::Function,
            "tool" => RoleType::Tool,
            _ => RoleType::NoRole,
        }
    }
}

impl Default for RoleType {
    fn default() -> Self {
        RoleType::NoRole
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize)]
#[diesel(table_name = sessions)]
pub struct Session {
    pub id: Uuid,
    pub session_id: String,
    pub project_id: Uuid,
    pub user_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: Uuid,
    pub session_id: String,
    pub project_id: Uuid,
    pub user_id: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize)]
#[diesel(table_name = messages, primary_key(sequence_id))]
pub struct Message {
    pub sequence_id: i64,
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub role_type: String,
    pub content: String,
    pub token_count: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn role_type(&self) -> RoleType {
        RoleType::from_str_lenient(&self.role_type)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub role_type: String,
    pub content: String,
    pub token_count: i32,
    pub metadata: serde_json::Value,
}

/// A message supplied by a caller of `putMessages`, before it's assigned a
/// sequence number. `id` is generated server-side when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInput {
    pub id: Option<Uuid>,
    pub role: String,
    #[serde(default)]
    pub role_type: RoleType,
    pub content: String,
    #[serde(default)]
    pub token_count: i32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, Serialize)]
#[diesel(table_name = summary)]
pub struct Summary {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub token_count: i32,
    pub summary_point_uuid: Uuid,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = summary)]
pub struct NewSummary {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub token_count: i32,
    pub summary_point_uuid: Uuid,
    pub metadata: serde_json::Value,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = message_embedding)]
pub struct MessageEmbeddingRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub message_uuid: Uuid,
    pub embedding: pgvector::Vector,
    pub is_embedded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = message_embedding)]
pub struct NewMessageEmbedding {
    pub id: Uuid,
    pub session_id: Uuid,
    pub message_uuid: Uuid,
    pub embedding: pgvector::Vector,
    pub is_embedded: bool,
}

/// In-memory record published by the store after a successful write,
/// fanned out to extractors. Never persisted.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub session_internal_id: Uuid,
    pub session_id: String,
    pub messages: Vec<Message>,
}
