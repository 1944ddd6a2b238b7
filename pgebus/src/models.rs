use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::time::OffsetDateTime;
use sqlx::FromRow;

/// Where an event originated. Carried through the core, never interpreted by it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum EventSource {
    Internal,
    External,
}

/// `Pending -> Running -> {Done, Pending, Failed}`. `Done` and terminal `Failed` are sinks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// A durable row representing a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub payload: JsonValue,
    pub source: EventSource,
    pub status: EventStatus,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub run_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
