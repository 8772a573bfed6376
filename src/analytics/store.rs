//! Analytics Storage
//! Mission: Cross-user aggregation queries for the admin dashboard

use crate::db;
use crate::tasks::models::completion_rate;
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rusqlite::params;
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_DAYS: u32 = 7;
pub const MAX_DAYS: u32 = 365;
const SUMMARY_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub total_users: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserTaskStats {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub task_count: i64,
    pub completed_count: i64,
    pub pending_count: i64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyStat {
    pub date: String,
    pub created: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub total_users: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopUser {
    pub email: String,
    pub task_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentActivity {
    pub title: String,
    pub user_email: String,
    pub completed: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub overview: Overview,
    pub top_users: Vec<TopUser>,
    pub recent_activity: Vec<RecentActivity>,
}

/// Read-only view over the users and tasks tables
pub struct AnalyticsStore {
    db_path: String,
}

impl AnalyticsStore {
    pub fn new(db_path: &str) -> Self {
        Self {
            db_path: db_path.to_string(),
        }
    }

    fn overview(&self, conn: &rusqlite::Connection) -> Result<Overview> {
        let (total_tasks, completed_tasks): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM tasks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to aggregate tasks")?;
        let total_users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")?;

        Ok(Overview {
            total_tasks,
            completed_tasks,
            pending_tasks: total_tasks - completed_tasks,
            total_users,
        })
    }

    pub fn dashboard(&self) -> Result<DashboardStats> {
        let conn = db::open(&self.db_path)?;
        let overview = self.overview(&conn)?;
        Ok(DashboardStats {
            total_tasks: overview.total_tasks,
            completed_tasks: overview.completed_tasks,
            pending_tasks: overview.pending_tasks,
            total_users: overview.total_users,
            completion_rate: completion_rate(overview.completed_tasks, overview.total_tasks),
        })
    }

    /// Every user with their task counts, busiest first
    pub fn user_stats(&self) -> Result<Vec<UserTaskStats>> {
        let conn = db::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT u.id, u.email, u.first_name, u.last_name,
                    COUNT(t.id) AS task_count,
                    COALESCE(SUM(t.completed), 0) AS completed_count
             FROM users u
             LEFT JOIN tasks t ON t.user_id = u.id
             GROUP BY u.id
             ORDER BY task_count DESC, u.email ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let task_count: i64 = row.get(4)?;
                let completed_count: i64 = row.get(5)?;
                Ok(UserTaskStats {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                    task_count,
                    completed_count,
                    pending_count: task_count - completed_count,
                    completion_rate: completion_rate(completed_count, task_count),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to aggregate user stats")?;
        Ok(rows)
    }

    /// Tasks created per day over the `days` days ending `today`, oldest first.
    /// `completed` counts tasks created that day that were also last updated
    /// (completed) the same day.
    pub fn daily_stats(&self, days: u32, today: NaiveDate) -> Result<Vec<DailyStat>> {
        let days = days.clamp(1, MAX_DAYS);
        let first = today - Duration::days(i64::from(days) - 1);

        let conn = db::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT substr(created_at, 1, 10) AS day,
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN completed = 1
                                       AND substr(updated_at, 1, 10) = substr(created_at, 1, 10)
                                      THEN 1 ELSE 0 END), 0)
             FROM tasks
             WHERE substr(created_at, 1, 10) BETWEEN ?1 AND ?2
             GROUP BY day",
        )?;

        let mut by_day: HashMap<String, (i64, i64)> = stmt
            .query_map(
                params![first.to_string(), today.to_string()],
                |row| {
                    let counts: (i64, i64) = (row.get(1)?, row.get(2)?);
                    Ok((row.get::<_, String>(0)?, counts))
                },
            )?
            .collect::<rusqlite::Result<_>>()
            .context("Failed to aggregate daily stats")?;

        Ok(first
            .iter_days()
            .take(days as usize)
            .map(|day| {
                let date = day.to_string();
                let (created, completed) = by_day.remove(&date).unwrap_or((0, 0));
                DailyStat {
                    date,
                    created,
                    completed,
                }
            })
            .collect())
    }

    pub fn summary(&self) -> Result<Summary> {
        let conn = db::open(&self.db_path)?;
        let overview = self.overview(&conn)?;

        let mut stmt = conn.prepare(
            "SELECT u.email, COUNT(t.id) AS task_count
             FROM users u
             JOIN tasks t ON t.user_id = u.id
             GROUP BY u.id
             ORDER BY task_count DESC, u.email ASC
             LIMIT ?1",
        )?;
        let top_users = stmt
            .query_map(params![SUMMARY_LIMIT as i64], |row| {
                Ok(TopUser {
                    email: row.get(0)?,
                    task_count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to rank users")?;

        let mut stmt = conn.prepare(
            "SELECT t.title, u.email, t.completed, t.created_at
             FROM tasks t
             JOIN users u ON u.id = t.user_id
             ORDER BY t.created_at DESC, t.id DESC
             LIMIT ?1",
        )?;
        let recent_activity = stmt
            .query_map(params![SUMMARY_LIMIT as i64], |row| {
                Ok(RecentActivity {
                    title: row.get(0)?,
                    user_email: row.get(1)?,
                    completed: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load recent activity")?;

        Ok(Summary {
            overview,
            top_users,
            recent_activity,
        })
    }
}
