//! Post Routes

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use pb_platform::{CreatePost, Post, PostPage, PostService};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::{ApiError, ApiResult, Envelope};
use crate::identity::AuthenticatedUser;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

async fn create_post(
    State(service): State<PostService>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    body: Result<Json<CreatePost>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(input) = body.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    let post = service.create_post(&user_id, input).await?;
    info!(post_id = %post.id, "Create post handled");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Post created successfully",
            "post": post,
        })),
    ))
}

async fn list_posts(
    State(service): State<PostService>,
    _user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<PostPage>> {
    Ok(Json(service.list_posts(query.page, query.limit).await?))
}

async fn get_post(
    State(service): State<PostService>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Post>> {
    Ok(Json(service.get_post(&id).await?))
}

async fn delete_post(
    State(service): State<PostService>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope>> {
    service.delete_post(&id, &user_id).await?;
    Ok(Json(Envelope::ok("Post deleted successfully")))
}

async fn soft_delete_post(
    State(service): State<PostService>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Envelope>> {
    service.soft_delete_post(&id).await?;
    Ok(Json(Envelope::ok("Post soft deleted successfully")))
}

pub fn posts_router(service: PostService) -> Router {
    Router::new()
        .route("/api/posts", post(create_post).get(list_posts))
        .route("/api/posts/:id", get(get_post).delete(delete_post))
        .route("/api/posts/:id/soft", delete(soft_delete_post))
        .with_state(service)
}
