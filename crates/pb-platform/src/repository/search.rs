//! Search Index Repository
//!
//! Records live in `searches`; deletions leave a row in
//! `search_tombstones` (expired by a TTL index) so a `post.created` that
//! arrives after its `post.deleted` cannot resurrect the record.

use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SearchIndex;
use crate::domain::{SearchRecord, UpsertOutcome};
use crate::error::Result;

pub const SEARCHES_COLLECTION: &str = "searches";
pub const TOMBSTONES_COLLECTION: &str = "search_tombstones";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchDocument {
    #[serde(rename = "_id")]
    post_id: String,
    user_id: String,
    content: String,
    created_at: BsonDateTime,
}

impl From<&SearchRecord> for SearchDocument {
    fn from(record: &SearchRecord) -> Self {
        Self {
            post_id: record.post_id.clone(),
            user_id: record.user_id.clone(),
            content: record.content.clone(),
            created_at: BsonDateTime::from_chrono(record.created_at),
        }
    }
}

impl From<SearchDocument> for SearchRecord {
    fn from(doc: SearchDocument) -> Self {
        Self {
            post_id: doc.post_id,
            user_id: doc.user_id,
            content: doc.content,
            created_at: doc.created_at.to_chrono(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TombstoneDocument {
    #[serde(rename = "_id")]
    post_id: String,
    deleted_at: BsonDateTime,
}

pub struct MongoSearchIndex {
    records: Collection<SearchDocument>,
    tombstones: Collection<TombstoneDocument>,
}

impl MongoSearchIndex {
    pub fn new(db: &Database) -> Self {
        Self {
            records: db.collection(SEARCHES_COLLECTION),
            tombstones: db.collection(TOMBSTONES_COLLECTION),
        }
    }

    async fn is_tombstoned(&self, post_id: &str) -> Result<bool> {
        Ok(self.tombstones.find_one(doc! { "_id": post_id }).await?.is_some())
    }
}

#[async_trait]
impl SearchIndex for MongoSearchIndex {
    async fn upsert(&self, record: &SearchRecord) -> Result<UpsertOutcome> {
        if self.is_tombstoned(&record.post_id).await? {
            return Ok(UpsertOutcome::Suppressed);
        }

        let result = self
            .records
            .replace_one(doc! { "_id": &record.post_id }, SearchDocument::from(record))
            .upsert(true)
            .await?;

        // A concurrent delete may have landed between the check and the write
        if self.is_tombstoned(&record.post_id).await? {
            self.records.delete_one(doc! { "_id": &record.post_id }).await?;
            debug!(post_id = %record.post_id, "Search record removed after concurrent delete");
            return Ok(UpsertOutcome::Suppressed);
        }

        if result.matched_count > 0 {
            Ok(UpsertOutcome::Replaced)
        } else {
            Ok(UpsertOutcome::Inserted)
        }
    }

    async fn remove(&self, post_id: &str) -> Result<bool> {
        let tombstone = TombstoneDocument {
            post_id: post_id.to_string(),
            deleted_at: BsonDateTime::from_chrono(Utc::now()),
        };
        self.tombstones
            .replace_one(doc! { "_id": post_id }, tombstone)
            .upsert(true)
            .await?;

        let result = self.records.delete_one(doc! { "_id": post_id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn get(&self, post_id: &str) -> Result<Option<SearchRecord>> {
        Ok(self
            .records
            .find_one(doc! { "_id": post_id })
            .await?
            .map(SearchRecord::from))
    }

    async fn search(&self, query: &str, limit: u64) -> Result<Vec<SearchRecord>> {
        let options = FindOptions::builder()
            .projection(doc! { "score": { "$meta": "textScore" } })
            .sort(doc! { "score": { "$meta": "textScore" }, "createdAt": -1 })
            .limit(limit as i64)
            .build();

        let cursor = self
            .records
            .find(doc! { "$text": { "$search": query } })
            .with_options(options)
            .await?;
        let docs: Vec<SearchDocument> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(SearchRecord::from).collect())
    }
}
