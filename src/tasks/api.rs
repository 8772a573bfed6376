//! Task API Endpoints
//! Mission: Per-user task CRUD, completion state and stats

use crate::auth::models::Claims;
use crate::error::ApiError;
use crate::tasks::models::{
    Completion, Task, TaskInput, TaskPatch, TaskQuery, TaskStats, TaskSummary,
};
use crate::tasks::store::TaskStore;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use axum_extra::extract::WithRejection;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type TaskState = Arc<TaskStore>;

fn owner(claims: &Claims) -> Result<Uuid, ApiError> {
    claims
        .user_id()
        .ok_or(ApiError::Unauthorized("Invalid or expired token"))
}

fn not_found() -> ApiError {
    ApiError::NotFound("Task not found".to_string())
}

/// GET /api/tasks
pub async fn list_tasks(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Query(query), _): WithRejection<Query<TaskQuery>, ApiError>,
) -> Result<Json<Vec<TaskSummary>>, ApiError> {
    let tasks = store.list(&owner(&claims)?, &query)?;
    Ok(Json(tasks.into_iter().map(TaskSummary::from).collect()))
}

/// POST /api/tasks
pub async fn create_task(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(input), _): WithRejection<Json<TaskInput>, ApiError>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let input = input.validate().map_err(ApiError::Validation)?;
    let user_id = owner(&claims)?;
    let task = store.create(&user_id, input)?;
    info!(task_id = task.id, user_id = %user_id, "Task created");
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<Task>, ApiError> {
    store
        .get(&owner(&claims)?, id)?
        .map(Json)
        .ok_or_else(not_found)
}

/// PUT /api/tasks/:id
pub async fn replace_task(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
    WithRejection(Json(input), _): WithRejection<Json<TaskInput>, ApiError>,
) -> Result<Json<Task>, ApiError> {
    let input = input.validate().map_err(ApiError::Validation)?;
    store
        .replace(&owner(&claims)?, id, input)?
        .map(Json)
        .ok_or_else(not_found)
}

/// PATCH /api/tasks/:id
pub async fn patch_task(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
    WithRejection(Json(patch), _): WithRejection<Json<TaskPatch>, ApiError>,
) -> Result<Json<Task>, ApiError> {
    let patch = patch.validate().map_err(ApiError::Validation)?;
    store
        .update(&owner(&claims)?, id, patch)?
        .map(Json)
        .ok_or_else(not_found)
}

/// DELETE /api/tasks/:id
pub async fn delete_task(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<StatusCode, ApiError> {
    if store.delete(&owner(&claims)?, id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}

fn change_completion(
    store: &TaskStore,
    claims: &Claims,
    id: i64,
    completion: Completion,
) -> Result<Json<Task>, ApiError> {
    store
        .set_completion(&owner(claims)?, id, completion)?
        .map(Json)
        .ok_or_else(not_found)
}

/// POST /api/tasks/:id/complete
pub async fn mark_completed(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<Task>, ApiError> {
    change_completion(&store, &claims, id, Completion::Done)
}

/// POST /api/tasks/:id/pending
pub async fn mark_pending(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<Task>, ApiError> {
    change_completion(&store, &claims, id, Completion::Pending)
}

/// POST /api/tasks/:id/toggle
pub async fn toggle_completion(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<Task>, ApiError> {
    change_completion(&store, &claims, id, Completion::Toggle)
}

/// GET /api/tasks/stats
pub async fn task_stats(
    State(store): State<TaskState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<TaskStats>, ApiError> {
    Ok(Json(store.stats(&owner(&claims)?)?))
}
