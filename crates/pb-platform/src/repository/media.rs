//! Media Repository

use async_trait::async_trait;
use bson::{doc, DateTime as BsonDateTime};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};

use super::MediaStore;
use crate::domain::Media;
use crate::error::Result;

pub const MEDIA_COLLECTION: &str = "media";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaDocument {
    #[serde(rename = "_id")]
    id: String,
    public_id: String,
    original_name: String,
    mime_type: String,
    url: String,
    user_id: String,
    created_at: BsonDateTime,
}

impl From<&Media> for MediaDocument {
    fn from(media: &Media) -> Self {
        Self {
            id: media.id.clone(),
            public_id: media.public_id.clone(),
            original_name: media.original_name.clone(),
            mime_type: media.mime_type.clone(),
            url: media.url.clone(),
            user_id: media.user_id.clone(),
            created_at: BsonDateTime::from_chrono(media.created_at),
        }
    }
}

impl From<MediaDocument> for Media {
    fn from(doc: MediaDocument) -> Self {
        Self {
            id: doc.id,
            public_id: doc.public_id,
            original_name: doc.original_name,
            mime_type: doc.mime_type,
            url: doc.url,
            user_id: doc.user_id,
            created_at: doc.created_at.to_chrono(),
        }
    }
}

pub struct MongoMediaStore {
    collection: Collection<MediaDocument>,
}

impl MongoMediaStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(MEDIA_COLLECTION),
        }
    }
}

#[async_trait]
impl MediaStore for MongoMediaStore {
    async fn insert(&self, media: &Media) -> Result<()> {
        self.collection.insert_one(MediaDocument::from(media)).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Media>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?.map(Media::from))
    }

    async fn find_all(&self) -> Result<Vec<Media>> {
        let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
        let cursor = self.collection.find(doc! {}).with_options(options).await?;
        let docs: Vec<MediaDocument> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(Media::from).collect())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = self.collection.delete_many(doc! { "_id": { "$in": ids } }).await?;
        Ok(result.deleted_count)
    }
}
