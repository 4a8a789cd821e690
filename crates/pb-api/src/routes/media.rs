use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use pb_platform::{Media, MediaService};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::identity::AuthenticatedUser;

async fn list_media(State(service): State<MediaService>, _user: AuthenticatedUser) -> ApiResult<Json<Value>> {
    let results = service.list_media().await?;
    Ok(Json(json!({ "results": results })))
}

async fn get_media(
    State(service): State<MediaService>,
    _user: AuthenticatedUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Media>> {
    Ok(Json(service.get_media(&id).await?))
}

pub fn media_router(service: MediaService) -> Router {
    Router::new()
        .route("/api/media/all", get(list_media))
        .route("/api/media/:id", get(get_media))
        .with_state(service)
}
