pub mod media;
pub mod search;

pub use media::MediaReferenceHandler;
pub use search::SearchProjectionHandler;
