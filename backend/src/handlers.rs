use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use newsroom_shared::{
    datastore::{server_increment, Datastore, PathUpdates},
    Article, DashboardSnapshot,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UserCountResponse {
    pub count: usize,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct UserCountError {
    pub error: String,
    pub message: String,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterResponse {
    pub id: String,
    pub counter: &'static str,
    pub changed: bool,
    pub success: bool,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
    })
}

pub async fn dashboard_snapshot(
    State(state): State<AppState>,
) -> Result<Json<DashboardSnapshot>, ApiError> {
    let snapshot = state
        .dashboard()
        .snapshot(chrono::Utc::now())
        .await
        .map_err(|e| internal_error("Failed to build dashboard snapshot", e))?;
    if snapshot.demo {
        tracing::warn!("dashboard snapshot contains demo placeholder data");
    }
    Ok(Json(snapshot))
}

pub async fn user_count(
    State(state): State<AppState>,
) -> Result<Json<UserCountResponse>, (StatusCode, Json<UserCountError>)> {
    match state.dashboard().user_count(chrono::Utc::now()).await {
        Ok(count) => Ok(Json(UserCountResponse {
            count,
            success: true,
        })),
        Err(err) => {
            tracing::error!("Failed to count users: {err}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UserCountError {
                    error: "Internal Server Error".to_string(),
                    message: "Failed to count users".to_string(),
                    success: false,
                }),
            ))
        },
    }
}

pub async fn record_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CounterResponse>, ApiError> {
    increment_counter(&state, &id, "views").await
}

pub async fn record_share(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CounterResponse>, ApiError> {
    increment_counter(&state, &id, "shared").await
}

pub async fn record_like(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<LikeRequest>,
) -> Result<Json<CounterResponse>, ApiError> {
    let user_id = request.user_id.trim();
    if !is_valid_key(user_id) {
        return Err(bad_request("Invalid user id"));
    }
    load_article(&state, &id).await?;

    let root = state.articles_path();
    let claimed = state
        .datastore()
        .claim(&format!("{root}/{id}/likedBy/{user_id}"))
        .await
        .map_err(|e| internal_error("Failed to record like", e))?;
    if !claimed {
        return Ok(Json(CounterResponse {
            id,
            counter: "upvote",
            changed: false,
            success: true,
        }));
    }

    let mut updates = PathUpdates::new();
    updates.insert(format!("{root}/{id}/upvote"), server_increment(1));
    state
        .datastore()
        .update(updates)
        .await
        .map_err(|e| internal_error("Failed to record like", e))?;

    Ok(Json(CounterResponse {
        id,
        counter: "upvote",
        changed: true,
        success: true,
    }))
}

async fn increment_counter(
    state: &AppState,
    id: &str,
    counter: &'static str,
) -> Result<Json<CounterResponse>, ApiError> {
    load_article(state, id).await?;

    let mut updates = PathUpdates::new();
    updates.insert(format!("{}/{id}/{counter}", state.articles_path()), server_increment(1));
    state
        .datastore()
        .update(updates)
        .await
        .map_err(|e| internal_error("Failed to update article counter", e))?;

    Ok(Json(CounterResponse {
        id: id.to_string(),
        counter,
        changed: true,
        success: true,
    }))
}

async fn load_article(state: &AppState, id: &str) -> Result<Article, ApiError> {
    if !is_valid_key(id) {
        return Err(bad_request("Invalid article id"));
    }
    let record = state
        .datastore()
        .read(&format!("{}/{id}", state.articles_path()))
        .await
        .map_err(|e| internal_error("Failed to fetch article", e))?;

    record
        .and_then(|record| Article::from_record(id, record))
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "Not Found".to_string(),
                    message: "Article not found".to_string(),
                }),
            )
        })
}

/// Keys the hosted store accepts as a single path segment.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 768
        && !key
            .chars()
            .any(|ch| matches!(ch, '/' | '.' | '#' | '$' | '[' | ']') || ch.is_control())
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "Bad Request".to_string(),
            message: message.to_string(),
        }),
    )
}

fn internal_error(message: &str, err: impl std::fmt::Display) -> ApiError {
    tracing::error!("{message}: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal Server Error".to_string(),
            message: message.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::is_valid_key;

    #[test]
    fn keys_reject_path_and_query_characters() {
        assert!(is_valid_key("-NzA1b2c3"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key("a.b"));
        assert!(!is_valid_key("a[0]"));
        assert!(!is_valid_key("$key"));
    }
}
