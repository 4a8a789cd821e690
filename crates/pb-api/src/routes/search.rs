use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use pb_platform::SearchService;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::identity::AuthenticatedUser;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
}

async fn search_posts(
    State(service): State<SearchService>,
    _user: AuthenticatedUser,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let results = service.search(&params.query).await?;
    Ok(Json(json!({ "success": true, "data": results })))
}

pub fn search_router(service: SearchService) -> Router {
    Router::new()
        .route("/api/search/posts", get(search_posts))
        .with_state(service)
}
