use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::db::{Article, Category, Database, Feed, FeedWithCategory};
use crate::error::ApiError;
use crate::ingest::Ingestor;

/// Fixed cap on article list responses; there is no cursor or offset.
const ARTICLE_LIST_LIMIT: i64 = 50;

pub struct AppState {
    pub db: Arc<Database>,
    pub ingestor: Arc<Ingestor>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/feeds", get(list_feeds).post(add_feed))
        .route("/api/feeds/validate", post(validate_feed))
        .route("/api/feeds/:id", patch(rename_feed).delete(delete_feed))
        .route("/api/feeds/:id/refresh", post(refresh_feed))
        .route("/api/articles", get(list_articles))
        .route("/api/articles/bookmarked", get(list_bookmarked))
        .route("/api/articles/:id", get(get_article).patch(set_read))
        .route("/api/articles/:id/bookmark", patch(set_bookmarked))
        .route("/api/categories", get(list_categories).post(create_category))
        .route("/health", get(health))
        .with_state(state)
}

/// Reject malformed ids before touching storage.
fn parse_id(raw: &str, resource: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::Validation(format!("Invalid {} ID", resource)))
}

// Feed handlers

async fn list_feeds(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FeedWithCategory>>, ApiError> {
    let feeds = state.db.get_all_feeds().await?;
    Ok(Json(feeds))
}

#[derive(Deserialize)]
struct ValidateRequest {
    url: String,
}

async fn validate_feed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Response {
    let validation = state.ingestor.validate(&req.url).await;
    if validation.valid {
        Json(json!({ "valid": true })).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "valid": false, "error": validation.reason })),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddFeedRequest {
    url: String,
    category_id: Option<i64>,
}

async fn add_feed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddFeedRequest>,
) -> Result<Json<Feed>, ApiError> {
    let feed = state.ingestor.add_feed(&req.url, req.category_id).await?;
    Ok(Json(feed))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameFeedRequest {
    custom_title: String,
}

async fn rename_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RenameFeedRequest>,
) -> Result<Json<Feed>, ApiError> {
    let id = parse_id(&id, "feed")?;
    let feed = state
        .db
        .rename_feed(id, &req.custom_title)
        .await?
        .ok_or(ApiError::NotFound("Feed"))?;
    Ok(Json(feed))
}

async fn refresh_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Feed>, ApiError> {
    let id = parse_id(&id, "feed")?;
    let feed = state.ingestor.refresh_feed(id).await?;
    Ok(Json(feed))
}

async fn delete_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "feed")?;
    state.db.delete_feed(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Article handlers

#[derive(Deserialize)]
struct ArticlesQuery {
    #[serde(rename = "feedId")]
    feed_id: Option<String>,
}

async fn list_articles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArticlesQuery>,
) -> Result<Json<Vec<Article>>, ApiError> {
    let feed_id = match query.feed_id.as_deref() {
        Some(raw) if !raw.is_empty() => Some(parse_id(raw, "feed")?),
        _ => None,
    };

    let articles = state.db.get_articles(feed_id, ARTICLE_LIST_LIMIT).await?;
    Ok(Json(articles))
}

async fn list_bookmarked(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Article>>, ApiError> {
    let articles = state.db.get_bookmarked_articles(ARTICLE_LIST_LIMIT).await?;
    Ok(Json(articles))
}

async fn get_article(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Article>, ApiError> {
    let id = parse_id(&id, "article")?;
    let article = state
        .db
        .get_article(id)
        .await?
        .ok_or(ApiError::NotFound("Article"))?;
    Ok(Json(article))
}

#[derive(Deserialize)]
struct SetReadRequest {
    read: bool,
}

async fn set_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetReadRequest>,
) -> Result<Json<Article>, ApiError> {
    let id = parse_id(&id, "article")?;
    let article = state
        .db
        .set_article_read(id, req.read)
        .await?
        .ok_or(ApiError::NotFound("Article"))?;
    Ok(Json(article))
}

#[derive(Deserialize)]
struct SetBookmarkedRequest {
    bookmarked: bool,
}

async fn set_bookmarked(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetBookmarkedRequest>,
) -> Result<Json<Article>, ApiError> {
    let id = parse_id(&id, "article")?;
    let article = state
        .db
        .set_article_bookmarked(id, req.bookmarked)
        .await?
        .ok_or(ApiError::NotFound("Article"))?;
    Ok(Json(article))
}

// Category handlers

async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let categories = state.db.get_all_categories().await?;
    Ok(Json(categories))
}

#[derive(Deserialize)]
struct CreateCategoryRequest {
    name: String,
    color: String,
}

async fn create_category(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<Json<Category>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Category name is required".to_string()));
    }
    let category = state.db.create_category(&req.name, &req.color).await?;
    Ok(Json(category))
}

async fn health() -> impl IntoResponse {
    "OK"
}
