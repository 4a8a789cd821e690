//! HTTP scenarios against in-memory stores, cache, broker and counters

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use pb_admission::{AdmissionLimiter, MemoryCounterStore};
use pb_api::{build_app, media_router, posts_router, search_router, USER_ID_HEADER};
use pb_broker::{Broker, BrokerPublisher, ExchangeSpec, InMemoryBroker};
use pb_cache::{CacheLayer, MemoryCacheStore};
use pb_config::RateLimitConfig;
use pb_platform::repository::{MemoryMediaStore, MemoryPostStore, MemorySearchIndex};
use pb_platform::{Media, MediaService, MediaStore, PostService, SearchIndex, SearchRecord, SearchService};
use serde_json::{json, Value};
use tower::ServiceExt;

const EXCHANGE: &str = "x_events";

struct TestApp {
    router: Router,
    search_index: Arc<MemorySearchIndex>,
    media: Arc<MemoryMediaStore>,
}

async fn test_app(limits: Option<RateLimitConfig>) -> TestApp {
    let broker = Arc::new(InMemoryBroker::new("api-tests"));
    broker.declare_exchange(&ExchangeSpec::topic(EXCHANGE)).await.unwrap();
    let cache = CacheLayer::new(Arc::new(MemoryCacheStore::new()));

    let posts = PostService::new(
        Arc::new(MemoryPostStore::new()),
        Arc::new(BrokerPublisher::new(broker.clone(), EXCHANGE)),
        cache.clone(),
    );
    let search_index = Arc::new(MemorySearchIndex::new());
    let search = SearchService::new(search_index.clone(), cache.clone());
    let media = Arc::new(MemoryMediaStore::new());
    let media_service = MediaService::new(media.clone(), cache);

    let api = posts_router(posts)
        .merge(search_router(search))
        .merge(media_router(media_service));
    let limiter = limits.map(|config| Arc::new(AdmissionLimiter::new(&config, Arc::new(MemoryCounterStore::new()))));

    TestApp {
        router: build_app("api-tests", api, limiter, None),
        search_index,
        media,
    }
}

fn request(method: Method, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_missing_identity_is_rejected() {
    let app = test_app(None).await;

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/posts", None, None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("Authentication required! Please login to continue"));
}

#[tokio::test]
async fn test_create_then_get_post() {
    let app = test_app(None).await;

    let (status, _, body) = send(
        &app.router,
        request(
            Method::POST,
            "/api/posts",
            Some("u1"),
            Some(json!({ "content": "hello world", "mediaIds": [] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["message"], json!("Post created successfully"));
    let id = body["post"]["_id"].as_str().unwrap().to_string();

    let (status, _, body) = send(&app.router, request(Method::GET, &format!("/api/posts/{}", id), Some("u2"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], json!("hello world"));
    assert_eq!(body["user"], json!("u1"));

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/posts?page=1&limit=5", Some("u2"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPosts"], json!(1));
    assert_eq!(body["posts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_post_body_is_bad_request() {
    let app = test_app(None).await;

    let (status, _, body) = send(
        &app.router,
        request(Method::POST, "/api/posts", Some("u1"), Some(json!({ "content": "x", "mediaIds": [] }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    let (status, _, body) = send(
        &app.router,
        request(Method::POST, "/api/posts", Some("u1"), Some(json!({ "mediaIds": [] }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_unknown_post_is_not_found() {
    let app = test_app(None).await;

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/posts/missing", Some("u1"), None)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "message": "Post not found" }));
}

#[tokio::test]
async fn test_delete_is_owner_scoped() {
    let app = test_app(None).await;
    let (_, _, body) = send(
        &app.router,
        request(Method::POST, "/api/posts", Some("u1"), Some(json!({ "content": "mine", "mediaIds": [] }))),
    )
    .await;
    let id = body["post"]["_id"].as_str().unwrap().to_string();
    let uri = format!("/api/posts/{}", id);

    let (status, _, _) = send(&app.router, request(Method::DELETE, &uri, Some("u2"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = send(&app.router, request(Method::DELETE, &uri, Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "Post deleted successfully" }));

    let (status, _, _) = send(&app.router, request(Method::GET, &uri, Some("u1"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_soft_delete_hides_post() {
    let app = test_app(None).await;
    let (_, _, body) = send(
        &app.router,
        request(Method::POST, "/api/posts", Some("u1"), Some(json!({ "content": "fading", "mediaIds": [] }))),
    )
    .await;
    let id = body["post"]["_id"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &app.router,
        request(Method::DELETE, &format!("/api/posts/{}/soft", id), Some("u1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("Post soft deleted successfully"));

    let (status, _, _) = send(&app.router, request(Method::GET, &format!("/api/posts/{}", id), Some("u1"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_requires_query() {
    let app = test_app(None).await;

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/search/posts?query=", Some("u1"), None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "success": false, "message": "Search query is required" }));
}

#[tokio::test]
async fn test_search_returns_matches() {
    let app = test_app(None).await;
    app.search_index
        .upsert(&SearchRecord {
            post_id: "p1".to_string(),
            user_id: "u1".to_string(),
            content: "rust topic exchange".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/search/posts?query=rust", Some("u1"), None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"][0]["postId"], json!("p1"));
}

#[tokio::test]
async fn test_media_routes() {
    let app = test_app(None).await;
    app.media
        .insert(&Media {
            id: "m1".to_string(),
            public_id: "pub-1".to_string(),
            original_name: "cat.png".to_string(),
            mime_type: "image/png".to_string(),
            url: "https://cdn.example.com/cat.png".to_string(),
            user_id: "u1".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/media/all", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["_id"], json!("m1"));

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/media/m1", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["originalName"], json!("cat.png"));

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/media/nope", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], json!("Media not found"));
}

#[tokio::test]
async fn test_admission_denies_with_retry_after() {
    let app = test_app(Some(RateLimitConfig {
        global_max: 2,
        ..RateLimitConfig::default()
    }))
    .await;

    let (status, headers, _) = send(&app.router, request(Method::GET, "/api/posts", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "ratelimit-limit"), Some("2"));
    assert_eq!(header_str(&headers, "ratelimit-remaining"), Some("1"));

    let (status, _, _) = send(&app.router, request(Method::GET, "/api/posts", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, body) = send(&app.router, request(Method::GET, "/api/posts", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({ "success": false, "message": "Too many requests" }));
    let retry_after: u64 = header_str(&headers, "retry-after").unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));

    // Separate identity, separate window
    let (status, _, _) = send(&app.router, request(Method::GET, "/api/posts", Some("u2"), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_denied_requests_never_reach_handlers() {
    let app = test_app(Some(RateLimitConfig {
        global_max: 1,
        ..RateLimitConfig::default()
    }))
    .await;
    let create = || {
        request(
            Method::POST,
            "/api/posts",
            Some("u1"),
            Some(json!({ "content": "counted", "mediaIds": [] })),
        )
    };

    let (status, _, _) = send(&app.router, create()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _, _) = send(&app.router, create()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _, body) = send(&app.router, request(Method::GET, "/api/posts", Some("u2"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPosts"], json!(1));
}

#[tokio::test]
async fn test_sensitive_window_is_tighter() {
    let app = test_app(Some(RateLimitConfig {
        global_max: 10,
        sensitive_max: 1,
        sensitive_routes: vec!["/api/search".to_string()],
        ..RateLimitConfig::default()
    }))
    .await;
    let search = || request(Method::GET, "/api/search/posts?query=rust", Some("u1"), None);

    let (status, _, _) = send(&app.router, search()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, headers, _) = send(&app.router, search()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(header_str(&headers, "retry-after").is_some());

    let (status, _, _) = send(&app.router, request(Method::GET, "/api/posts", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let app = test_app(Some(RateLimitConfig {
        global_max: 1,
        ..RateLimitConfig::default()
    }))
    .await;

    for _ in 0..3 {
        let (status, _, body) = send(&app.router, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("UP"));
        assert_eq!(body["service"], json!("api-tests"));
    }

    let (status, _, _) = send(&app.router, request(Method::GET, "/metrics", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
