//! Task data structures and input validation

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_TITLE_LEN: usize = 200;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    /// Owner's email, exposed as `user`
    #[serde(rename = "user")]
    pub owner_email: String,
}

/// List view row; leaves out the description.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: i64,
    pub title: String,
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            completed: task.completed,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Body for create and full update
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

/// Body for partial update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

impl TaskInput {
    /// Trim and check fields. Returns the message to show the client on failure.
    pub fn validate(self) -> Result<Self, String> {
        Ok(Self {
            title: clean_title(&self.title)?,
            description: self.description.trim().to_string(),
            completed: self.completed,
        })
    }
}

impl TaskPatch {
    pub fn validate(self) -> Result<Self, String> {
        Ok(Self {
            title: self.title.as_deref().map(clean_title).transpose()?,
            description: self.description.map(|d| d.trim().to_string()),
            completed: self.completed,
        })
    }
}

fn clean_title(title: &str) -> Result<String, String> {
    let title = title.trim();
    if title.is_empty() {
        return Err("Title cannot be empty".to_string());
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LEN
        ));
    }
    Ok(title.to_string())
}

/// What to do to a task's completion flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    Pending,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Title,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ordering {
    pub field: SortField,
    pub descending: bool,
}

impl Default for Ordering {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            descending: true,
        }
    }
}

impl Ordering {
    /// `created_at`, `-updated_at`, `title`... Unrecognized fields fall back to the default.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (descending, name) = match raw.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, raw),
        };
        let field = match name {
            "created_at" => SortField::CreatedAt,
            "updated_at" => SortField::UpdatedAt,
            "title" => SortField::Title,
            _ => return Self::default(),
        };
        Self { field, descending }
    }
}

/// Query string for `GET /api/tasks`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskQuery {
    pub completed: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub completion_rate: f64,
}

impl TaskStats {
    pub fn new(total_tasks: i64, completed_tasks: i64) -> Self {
        Self {
            total_tasks,
            completed_tasks,
            pending_tasks: total_tasks - completed_tasks,
            completion_rate: completion_rate(completed_tasks, total_tasks),
        }
    }
}

/// Percentage rounded to two decimals; 0 when there is nothing to complete.
pub fn completion_rate(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let rate = completed as f64 / total as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_validation() {
        let input = TaskInput {
            title: "  Buy milk  ".to_string(),
            description: "  two litres ".to_string(),
            completed: false,
        };
        let clean = input.validate().unwrap();
        assert_eq!(clean.title, "Buy milk");
        assert_eq!(clean.description, "two litres");

        let blank = TaskInput {
            title: "   ".to_string(),
            description: String::new(),
            completed: false,
        };
        assert_eq!(blank.validate().unwrap_err(), "Title cannot be empty");

        let long = TaskPatch {
            title: Some("x".repeat(201)),
            ..Default::default()
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_ordering_parse() {
        assert_eq!(Ordering::parse("title").field, SortField::Title);
        assert!(!Ordering::parse("title").descending);
        assert!(Ordering::parse("-updated_at").descending);
        assert_eq!(Ordering::parse("password_hash"), Ordering::default());
    }

    #[test]
    fn test_completion_rate_rounding() {
        assert_eq!(completion_rate(1, 3), 33.33);
        assert_eq!(completion_rate(2, 3), 66.67);
        assert_eq!(completion_rate(0, 0), 0.0);
        assert_eq!(TaskStats::new(4, 1).pending_tasks, 3);
    }
}
