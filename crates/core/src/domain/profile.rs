use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;
use crate::domain::session::SessionId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: Option<String>,
    pub profile_json: serde_json::Value,
    pub preferences_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: None,
            profile_json: serde_json::json!({}),
            preferences_json: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted record of one completed turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: TurnId,
    pub user_id: UserId,
    pub session_id: SessionId,
    pub message: String,
    pub response: Option<String>,
    pub intent: Intent,
    pub capability: Option<String>,
    pub metadata_json: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Condensed prior turn as seen by the Router and capabilities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnSummary {
    pub request_text: String,
    pub response_text: Option<String>,
    pub intent: Intent,
    pub occurred_at: DateTime<Utc>,
}

impl From<&TurnRecord> for TurnSummary {
    fn from(record: &TurnRecord) -> Self {
        Self {
            request_text: record.message.clone(),
            response_text: record.response.clone(),
            intent: record.intent,
            occurred_at: record.created_at,
        }
    }
}
