//! Post Repository

use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::options::{FindOptions, ReturnDocument};
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

use super::PostStore;
use crate::domain::Post;
use crate::error::Result;

pub const POSTS_COLLECTION: &str = "posts";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostDocument {
    #[serde(rename = "_id")]
    id: String,
    user: String,
    content: String,
    #[serde(default)]
    media_ids: Vec<String>,
    created_at: BsonDateTime,
    #[serde(default)]
    deleted_at: Option<BsonDateTime>,
}

impl From<&Post> for PostDocument {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            user: post.user_id.clone(),
            content: post.content.clone(),
            media_ids: post.media_ids.clone(),
            created_at: BsonDateTime::from_chrono(post.created_at),
            deleted_at: post.deleted_at.map(BsonDateTime::from_chrono),
        }
    }
}

impl From<PostDocument> for Post {
    fn from(doc: PostDocument) -> Self {
        Self {
            id: doc.id,
            user_id: doc.user,
            content: doc.content,
            media_ids: doc.media_ids,
            created_at: doc.created_at.to_chrono(),
            deleted_at: doc.deleted_at.map(|d| d.to_chrono()),
        }
    }
}

pub struct MongoPostStore {
    collection: Collection<PostDocument>,
}

impl MongoPostStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(POSTS_COLLECTION),
        }
    }
}

#[async_trait]
impl PostStore for MongoPostStore {
    async fn insert(&self, post: &Post) -> Result<()> {
        self.collection.insert_one(PostDocument::from(post)).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Post>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?.map(Post::from))
    }

    async fn find_page(&self, skip: u64, limit: u64) -> Result<Vec<Post>> {
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1, "_id": -1 })
            .skip(skip)
            .limit(limit as i64)
            .build();

        let cursor = self
            .collection
            .find(doc! { "deletedAt": null })
            .with_options(options)
            .await?;
        let docs: Vec<PostDocument> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(Post::from).collect())
    }

    async fn count_live(&self) -> Result<u64> {
        Ok(self.collection.count_documents(doc! { "deletedAt": null }).await?)
    }

    async fn delete_owned(&self, id: &str, user_id: &str) -> Result<Option<Post>> {
        Ok(self
            .collection
            .find_one_and_delete(doc! { "_id": id, "user": user_id })
            .await?
            .map(Post::from))
    }

    async fn soft_delete(&self, id: &str, at: DateTime<Utc>) -> Result<Option<Post>> {
        Ok(self
            .collection
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": { "deletedAt": BsonDateTime::from_chrono(at) } },
            )
            .return_document(ReturnDocument::After)
            .await?
            .map(Post::from))
    }
}
