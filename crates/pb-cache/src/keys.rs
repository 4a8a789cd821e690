//! Cache key namespaces
//!
//! Keys are plain UTF-8 strings of the form `<namespace>:<selector>`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// `post:<id>`
    Post,
    /// `posts:<page>:<limit>`
    Posts,
    /// `search:<query>`
    Search,
    /// `media:<id>` and `media:all`
    Media,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Posts => "posts",
            Self::Search => "search",
            Self::Media => "media",
        }
    }

    /// Prefix shared by every key in the namespace, colon included
    pub fn prefix(&self) -> String {
        format!("{}:", self.as_str())
    }
}

pub fn post(id: &str) -> String {
    format!("post:{}", id)
}

pub fn posts_page(page: u64, limit: u64) -> String {
    format!("posts:{}:{}", page, limit)
}

pub fn search(query: &str) -> String {
    format!("search:{}", query)
}

pub fn media(id: &str) -> String {
    format!("media:{}", id)
}

pub fn media_all() -> String {
    media("all")
}

/// Namespace part of a key, for metric labels
pub fn namespace_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(post("p1"), "post:p1");
        assert_eq!(posts_page(2, 10), "posts:2:10");
        assert_eq!(search("rust async"), "search:rust async");
        assert_eq!(media_all(), "media:all");
    }

    #[test]
    fn test_post_prefix_does_not_cover_pages() {
        assert!(post("p1").starts_with(&CacheNamespace::Post.prefix()));
        assert!(!posts_page(1, 10).starts_with(&CacheNamespace::Post.prefix()));
        assert!(posts_page(1, 10).starts_with(&CacheNamespace::Posts.prefix()));
        assert_eq!(namespace_of("posts:1:10"), "posts");
    }
}
