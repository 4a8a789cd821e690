use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Uploaded media metadata. Uploads happen elsewhere; this service reads and
/// removes records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    #[serde(rename = "_id")]
    pub id: String,
    pub public_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub url: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}
