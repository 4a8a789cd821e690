use chrono::{DateTime, Utc};
use pb_common::PostCreated;
use serde::{Deserialize, Serialize};

/// Derived search record, keyed by post id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRecord {
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PostCreated> for SearchRecord {
    fn from(fact: &PostCreated) -> Self {
        Self {
            post_id: fact.post_id.clone(),
            user_id: fact.user_id.clone(),
            content: fact.content.clone(),
            created_at: fact.created_at,
        }
    }
}

/// Result of applying a record to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// The post was already deleted; nothing is kept
    Suppressed,
}
