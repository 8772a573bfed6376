//! Analytics API Endpoints (admin only)

use crate::analytics::store::{
    AnalyticsStore, DailyStat, DashboardStats, Summary, UserTaskStats, DEFAULT_DAYS, MAX_DAYS,
};
use crate::error::ApiError;
use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

pub type AnalyticsState = Arc<AnalyticsStore>;

#[derive(Debug, Deserialize)]
pub struct DailyStatsQuery {
    pub days: Option<u32>,
}

/// GET /analytics/api/dashboard-stats
pub async fn dashboard_stats(
    State(store): State<AnalyticsState>,
) -> Result<Json<DashboardStats>, ApiError> {
    Ok(Json(store.dashboard()?))
}

/// GET /analytics/api/user-stats
pub async fn user_stats(
    State(store): State<AnalyticsState>,
) -> Result<Json<Vec<UserTaskStats>>, ApiError> {
    Ok(Json(store.user_stats()?))
}

/// GET /analytics/api/daily-stats?days=N
pub async fn daily_stats(
    State(store): State<AnalyticsState>,
    WithRejection(Query(query), _): WithRejection<Query<DailyStatsQuery>, ApiError>,
) -> Result<Json<Vec<DailyStat>>, ApiError> {
    let days = query.days.unwrap_or(DEFAULT_DAYS);
    if !(1..=MAX_DAYS).contains(&days) {
        return Err(ApiError::Validation(format!(
            "days must be between 1 and {}",
            MAX_DAYS
        )));
    }
    Ok(Json(store.daily_stats(days, Utc::now().date_naive())?))
}

/// GET /analytics/api/summary
pub async fn summary(State(store): State<AnalyticsState>) -> Result<Json<Summary>, ApiError> {
    Ok(Json(store.summary()?))
}
