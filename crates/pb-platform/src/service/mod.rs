//! Services
//!
//! Write paths commit to the authoritative store before touching the broker
//! or the cache. Read paths go through the cache layer.

pub mod media;
pub mod post;
pub mod search;

pub use media::MediaService;
pub use post::{PostService, DEFAULT_PAGE, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use search::{SearchService, SEARCH_RESULT_LIMIT};
