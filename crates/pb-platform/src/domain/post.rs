//! Post Entity

use chrono::{DateTime, SubsecRound, Utc};
use pb_common::{PostCreated, PostDeleted};
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};

pub const CONTENT_MIN_CHARS: usize = 2;
pub const CONTENT_MAX_CHARS: usize = 3000;

/// Authoritative post record. Serialized in the shape clients and caches
/// have always seen (`_id`, `user`, camelCase fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "user")]
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub media_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>, media_ids: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            media_ids,
            // The store keeps millisecond precision
            created_at: Utc::now().trunc_subsecs(3),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn created_fact(&self) -> PostCreated {
        PostCreated {
            post_id: self.id.clone(),
            user_id: self.user_id.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }

    pub fn deleted_fact(&self) -> PostDeleted {
        PostDeleted {
            post_id: self.id.clone(),
            user_id: self.user_id.clone(),
            media_ids: self.media_ids.clone(),
        }
    }
}

/// Create-post request body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePost {
    pub content: String,
    #[serde(default)]
    pub media_ids: Vec<String>,
}

impl CreatePost {
    pub fn validate(&self) -> Result<()> {
        let chars = self.content.chars().count();
        if chars < CONTENT_MIN_CHARS {
            return Err(PlatformError::validation(format!(
                "\"content\" length must be at least {} characters long",
                CONTENT_MIN_CHARS
            )));
        }
        if chars > CONTENT_MAX_CHARS {
            return Err(PlatformError::validation(format!(
                "\"content\" length must be less than or equal to {} characters long",
                CONTENT_MAX_CHARS
            )));
        }
        if self.media_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(PlatformError::validation("\"mediaIds\" must not contain empty ids"));
        }
        Ok(())
    }
}

/// One page of live posts, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub current_page: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub total_pages: u64,
    pub total_posts: u64,
}

impl PostPage {
    pub fn new(posts: Vec<Post>, page: u64, limit: u64, total_posts: u64) -> Self {
        let total_pages = total_posts.div_ceil(limit.max(1));
        Self {
            posts,
            current_page: page,
            has_next_page: page < total_pages,
            has_previous_page: page > 1,
            total_pages,
            total_posts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_bounds() {
        let input = |content: &str| CreatePost {
            content: content.to_string(),
            media_ids: vec![],
        };

        assert!(input("a").validate().is_err());
        assert!(input("ab").validate().is_ok());
        assert!(input(&"x".repeat(3000)).validate().is_ok());
        assert!(input(&"x".repeat(3001)).validate().is_err());
    }

    #[test]
    fn test_page_metadata() {
        let page = PostPage::new(vec![], 1, 10, 25);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next_page);
        assert!(!page.has_previous_page);

        let last = PostPage::new(vec![], 3, 10, 25);
        assert!(!last.has_next_page);
        assert!(last.has_previous_page);

        let empty = PostPage::new(vec![], 1, 10, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
    }

    #[test]
    fn test_post_json_shape() {
        let post = Post::new("u1", "hello", vec!["m1".into()]);
        let json = serde_json::to_value(&post).unwrap();

        assert_eq!(json["_id"], post.id.as_str());
        assert_eq!(json["user"], "u1");
        assert_eq!(json["mediaIds"][0], "m1");
        assert!(json["deletedAt"].is_null());

        let back: Post = serde_json::from_value(json).unwrap();
        assert_eq!(back, post);
    }

    #[test]
    fn test_facts_carry_post_fields() {
        let post = Post::new("u1", "hello", vec!["m1".into()]);
        assert_eq!(post.created_fact().created_at, post.created_at);
        assert_eq!(post.deleted_fact().media_ids, vec!["m1"]);
    }
}
