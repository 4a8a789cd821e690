use std::time::Duration;

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Database, IndexModel};
use tracing::info;

use super::media::MEDIA_COLLECTION;
use super::post::POSTS_COLLECTION;
use super::search::{SEARCHES_COLLECTION, TOMBSTONES_COLLECTION};
use crate::error::Result;

/// How long a deletion tombstone suppresses a late `post.created`
pub const TOMBSTONE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn index(keys: Document, name: &str) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().name(name.to_string()).build())
        .build()
}

/// Create the indexes the stores query by. Should be called on startup.
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    db.collection::<Document>(POSTS_COLLECTION)
        .create_indexes(vec![
            // Live listing, newest first
            index(doc! { "deletedAt": 1, "createdAt": -1 }, "idx_live_recent"),
            index(doc! { "user": 1 }, "idx_user"),
            index(doc! { "content": "text" }, "idx_content_text"),
        ])
        .await?;
    info!(collection = POSTS_COLLECTION, "Ensured indexes");

    db.collection::<Document>(SEARCHES_COLLECTION)
        .create_indexes(vec![
            index(doc! { "content": "text" }, "idx_content_text"),
            index(doc! { "createdAt": -1 }, "idx_created"),
        ])
        .await?;
    info!(collection = SEARCHES_COLLECTION, "Ensured indexes");

    let tombstone_ttl = IndexModel::builder()
        .keys(doc! { "deletedAt": 1 })
        .options(
            IndexOptions::builder()
                .name("idx_tombstone_ttl".to_string())
                .expire_after(TOMBSTONE_TTL)
                .build(),
        )
        .build();
    db.collection::<Document>(TOMBSTONES_COLLECTION)
        .create_index(tombstone_ttl)
        .await?;
    info!(collection = TOMBSTONES_COLLECTION, "Ensured indexes");

    db.collection::<Document>(MEDIA_COLLECTION)
        .create_indexes(vec![index(doc! { "userId": 1, "createdAt": -1 }, "idx_user_recent")])
        .await?;
    info!(collection = MEDIA_COLLECTION, "Ensured indexes");

    Ok(())
}
