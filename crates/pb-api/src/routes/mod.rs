pub mod health;
pub mod media;
pub mod posts;
pub mod search;

pub use health::health_router;
pub use media::media_router;
pub use posts::posts_router;
pub use search::search_router;
