//! Domain Entities

pub mod media;
pub mod post;
pub mod search;

pub use media::Media;
pub use post::{CreatePost, Post, PostPage, CONTENT_MAX_CHARS, CONTENT_MIN_CHARS};
pub use search::{SearchRecord, UpsertOutcome};
