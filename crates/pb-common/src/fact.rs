//! Facts published on the topic exchange
//!
//! A fact is a denormalized record of something that already happened.
//! The wire body is the bare JSON payload; the routing key selects the schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

pub const POST_CREATED: &str = "post.created";
pub const POST_DELETED: &str = "post.deleted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PostCreated {
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PostDeleted {
    pub post_id: String,
    pub user_id: String,
    pub media_ids: Vec<String>,
}

/// Payload schema, tagged by routing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FactPayload {
    PostCreated(PostCreated),
    PostDeleted(PostDeleted),
}

impl FactPayload {
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::PostCreated(_) => POST_CREATED,
            Self::PostDeleted(_) => POST_DELETED,
        }
    }

    /// Identifier of the entity the fact is about
    pub fn entity_id(&self) -> &str {
        match self {
            Self::PostCreated(p) => &p.post_id,
            Self::PostDeleted(p) => &p.post_id,
        }
    }

    /// Decode a wire body using the schema selected by `routing_key`.
    pub fn decode(routing_key: &str, body: &[u8]) -> Result<Self, DecodeError> {
        let malformed = |source| DecodeError::Malformed {
            routing_key: routing_key.to_string(),
            source,
        };

        let payload = match routing_key {
            POST_CREATED => Self::PostCreated(serde_json::from_slice(body).map_err(malformed)?),
            POST_DELETED => Self::PostDeleted(serde_json::from_slice(body).map_err(malformed)?),
            other => return Err(DecodeError::UnknownRoutingKey(other.to_string())),
        };

        payload.validate()?;
        Ok(payload)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::PostCreated(p) => serde_json::to_vec(p),
            Self::PostDeleted(p) => serde_json::to_vec(p),
        }
    }

    fn validate(&self) -> Result<(), DecodeError> {
        let invalid = |message: &str| DecodeError::Invalid {
            routing_key: self.routing_key().to_string(),
            message: message.to_string(),
        };

        if self.entity_id().trim().is_empty() {
            return Err(invalid("postId must not be empty"));
        }

        match self {
            Self::PostCreated(p) if p.user_id.trim().is_empty() => Err(invalid("userId must not be empty")),
            Self::PostDeleted(p) if p.media_ids.iter().any(|id| id.trim().is_empty()) => {
                Err(invalid("mediaIds must not contain empty ids"))
            }
            _ => Ok(()),
        }
    }
}

impl From<PostCreated> for FactPayload {
    fn from(value: PostCreated) -> Self {
        Self::PostCreated(value)
    }
}

impl From<PostDeleted> for FactPayload {
    fn from(value: PostDeleted) -> Self {
        Self::PostDeleted(value)
    }
}

/// An immutable published fact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    /// Broker message id, used for log correlation only
    pub id: String,
    pub payload: FactPayload,
    pub published_at: DateTime<Utc>,
}

impl Fact {
    pub fn new(payload: impl Into<FactPayload>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload: payload.into(),
            published_at: Utc::now(),
        }
    }

    pub fn routing_key(&self) -> &'static str {
        self.payload.routing_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_post_created() {
        let body = br#"{"postId":"p1","userId":"u1","content":"hi","createdAt":"2024-01-01T00:00:00Z"}"#;
        let payload = FactPayload::decode(POST_CREATED, body).unwrap();

        match payload {
            FactPayload::PostCreated(p) => {
                assert_eq!(p.post_id, "p1");
                assert_eq!(p.user_id, "u1");
                assert_eq!(p.content, "hi");
                assert_eq!(p.created_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_post_deleted() {
        let body = br#"{"postId":"p1","userId":"u1","mediaIds":["m1","m2"]}"#;
        let payload = FactPayload::decode(POST_DELETED, body).unwrap();

        assert_eq!(payload.routing_key(), POST_DELETED);
        assert_eq!(payload.entity_id(), "p1");
        match payload {
            FactPayload::PostDeleted(p) => assert_eq!(p.media_ids, vec!["m1", "m2"]),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_accepts_millisecond_timestamps() {
        let body = br#"{"postId":"p1","userId":"u1","content":"hi","createdAt":"2024-01-01T00:00:00.000Z"}"#;
        assert!(FactPayload::decode(POST_CREATED, body).is_ok());
    }

    #[test]
    fn test_decode_rejects_unknown_routing_key() {
        let err = FactPayload::decode("post.updated", b"{}").unwrap_err();
        assert!(matches!(err, DecodeError::UnknownRoutingKey(k) if k == "post.updated"));
    }

    #[test]
    fn test_decode_rejects_malformed_and_mismatched_shapes() {
        assert!(matches!(
            FactPayload::decode(POST_CREATED, b"not json"),
            Err(DecodeError::Malformed { .. })
        ));

        // A post.deleted body sent under post.created is missing fields
        let deleted_body = br#"{"postId":"p1","userId":"u1","mediaIds":[]}"#;
        assert!(matches!(
            FactPayload::decode(POST_CREATED, deleted_body),
            Err(DecodeError::Malformed { .. })
        ));

        // Unknown fields are rejected
        let extra = br#"{"postId":"p1","userId":"u1","mediaIds":[],"extra":true}"#;
        assert!(matches!(
            FactPayload::decode(POST_DELETED, extra),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_empty_ids() {
        let body = br#"{"postId":"  ","userId":"u1","mediaIds":[]}"#;
        assert!(matches!(
            FactPayload::decode(POST_DELETED, body),
            Err(DecodeError::Invalid { .. })
        ));
    }

    #[test]
    fn test_encoded_body_uses_wire_field_names() {
        let payload = FactPayload::from(PostDeleted {
            post_id: "p1".into(),
            user_id: "u1".into(),
            media_ids: vec![],
        });

        let json: serde_json::Value = serde_json::from_slice(&payload.encode().unwrap()).unwrap();
        assert_eq!(json["postId"], "p1");
        assert_eq!(json["userId"], "u1");
        assert!(json["mediaIds"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_fact_new_assigns_id_and_key() {
        let fact = Fact::new(PostCreated {
            post_id: "p1".into(),
            user_id: "u1".into(),
            content: "hi".into(),
            created_at: Utc::now(),
        });

        assert_eq!(fact.routing_key(), POST_CREATED);
        assert!(!fact.id.is_empty());
    }
}
