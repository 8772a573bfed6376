//! Task Storage
//! Mission: Per-user task persistence in SQLite

use crate::db;
use crate::tasks::models::{Completion, Ordering, Task, TaskInput, TaskPatch, TaskQuery, TaskStats};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, types::Type, types::Value, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, title, description, completed, created_at, updated_at, user_id, \
     (SELECT email FROM users WHERE users.id = tasks.user_id)";

pub struct TaskStore {
    db_path: String,
}

impl TaskStore {
    /// Needs the `users` table to exist (see `UserStore::new`).
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = db::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_user_created ON tasks(user_id, created_at)",
            [],
        )?;

        Ok(())
    }

    pub fn list(&self, user_id: &Uuid, query: &TaskQuery) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {} FROM tasks WHERE user_id = ?", TASK_COLUMNS);
        let mut args: Vec<Value> = vec![Value::Text(user_id.to_string())];

        if let Some(completed) = query.completed {
            sql.push_str(" AND completed = ?");
            args.push(Value::Integer(completed as i64));
        }

        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            sql.push_str(" AND (title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = format!("%{}%", escape_like(term));
            args.push(Value::Text(pattern.clone()));
            args.push(Value::Text(pattern));
        }

        let ordering = query
            .ordering
            .as_deref()
            .map(Ordering::parse)
            .unwrap_or_default();
        let direction = if ordering.descending { "DESC" } else { "ASC" };
        // id breaks ties between rows created in the same microsecond
        sql.push_str(&format!(
            " ORDER BY {col} {dir}, id {dir}",
            col = ordering.field.column(),
            dir = direction
        ));

        let conn = db::open(&self.db_path)?;
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params_from_iter(args), row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list tasks")?;
        Ok(tasks)
    }

    pub fn create(&self, user_id: &Uuid, input: TaskInput) -> Result<Task> {
        self.create_at(user_id, input, Utc::now())
    }

    /// Insert with an explicit creation time
    pub fn create_at(&self, user_id: &Uuid, input: TaskInput, now: DateTime<Utc>) -> Result<Task> {
        let stamp = timestamp(now);
        db::write(&self.db_path, |tx| {
            tx.execute(
                "INSERT INTO tasks (title, description, completed, created_at, updated_at, user_id)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
                params![
                    input.title,
                    input.description,
                    input.completed,
                    stamp,
                    user_id.to_string()
                ],
            )
            .context("Failed to insert task")?;

            let id = tx.last_insert_rowid();
            debug!(task_id = id, user_id = %user_id, "Created task");
            fetch(tx, user_id, id)?.context("Inserted task vanished")
        })
    }

    pub fn get(&self, user_id: &Uuid, id: i64) -> Result<Option<Task>> {
        let conn = db::open(&self.db_path)?;
        fetch(&conn, user_id, id)
    }

    /// Full update. `None` when the task does not exist or belongs to someone else.
    pub fn replace(&self, user_id: &Uuid, id: i64, input: TaskInput) -> Result<Option<Task>> {
        self.update(
            user_id,
            id,
            TaskPatch {
                title: Some(input.title),
                description: Some(input.description),
                completed: Some(input.completed),
            },
        )
    }

    /// Partial update; absent fields keep their value.
    pub fn update(&self, user_id: &Uuid, id: i64, patch: TaskPatch) -> Result<Option<Task>> {
        let stamp = timestamp(Utc::now());
        db::write(&self.db_path, |tx| {
            let changed = tx
                .execute(
                    "UPDATE tasks SET
                        title = COALESCE(?1, title),
                        description = COALESCE(?2, description),
                        completed = COALESCE(?3, completed),
                        updated_at = ?4
                     WHERE id = ?5 AND user_id = ?6",
                    params![
                        patch.title,
                        patch.description,
                        patch.completed,
                        stamp,
                        id,
                        user_id.to_string()
                    ],
                )
                .context("Failed to update task")?;

            if changed == 0 {
                return Ok(None);
            }
            fetch(tx, user_id, id)
        })
    }

    pub fn set_completion(
        &self,
        user_id: &Uuid,
        id: i64,
        completion: Completion,
    ) -> Result<Option<Task>> {
        let expr = match completion {
            Completion::Done => "1",
            Completion::Pending => "0",
            Completion::Toggle => "NOT completed",
        };
        let stamp = timestamp(Utc::now());

        db::write(&self.db_path, |tx| {
            let changed = tx
                .execute(
                    &format!(
                        "UPDATE tasks SET completed = {}, updated_at = ?1 WHERE id = ?2 AND user_id = ?3",
                        expr
                    ),
                    params![stamp, id, user_id.to_string()],
                )
                .context("Failed to update task completion")?;

            if changed == 0 {
                return Ok(None);
            }
            fetch(tx, user_id, id)
        })
    }

    /// Returns false when there was nothing of this user's to delete.
    pub fn delete(&self, user_id: &Uuid, id: i64) -> Result<bool> {
        let conn = db::open(&self.db_path)?;
        let removed = conn
            .execute(
                "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                params![id, user_id.to_string()],
            )
            .context("Failed to delete task")?;
        Ok(removed > 0)
    }

    pub fn stats(&self, user_id: &Uuid) -> Result<TaskStats> {
        let conn = db::open(&self.db_path)?;
        let (total, completed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM tasks WHERE user_id = ?1",
            params![user_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(TaskStats::new(total, completed))
    }
}

/// Timestamps are stored as fixed-width UTC RFC 3339 so they sort as text.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn fetch(conn: &rusqlite::Connection, user_id: &Uuid, id: i64) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            &format!(
                "SELECT {} FROM tasks WHERE id = ?1 AND user_id = ?2",
                TASK_COLUMNS
            ),
            params![id, user_id.to_string()],
            row_to_task,
        )
        .optional()?;
    Ok(task)
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let user_id: String = row.get(6)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        completed: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        user_id: Uuid::parse_str(&user_id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
        owner_email: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::UserRole;
    use crate::auth::user_store::{NewUser, UserStore};
    use chrono::Duration;
    use tempfile::NamedTempFile;

    struct Fixture {
        tasks: TaskStore,
        users: UserStore,
        _temp: NamedTempFile,
    }

    fn fixture() -> Fixture {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap();
        let users = UserStore::with_cost(path, 4).unwrap();
        let tasks = TaskStore::new(path).unwrap();
        Fixture {
            tasks,
            users,
            _temp: temp,
        }
    }

    fn user(users: &UserStore, email: &str) -> Uuid {
        users
            .create_user(
                NewUser {
                    email: email.to_string(),
                    password: "password123".to_string(),
                    first_name: String::new(),
                    last_name: String::new(),
                },
                UserRole::User,
            )
            .unwrap()
            .unwrap()
            .id
    }

    fn input(title: &str, description: &str) -> TaskInput {
        TaskInput {
            title: title.to_string(),
            description: description.to_string(),
            completed: false,
        }
    }

    #[test]
    fn test_tasks_are_private_to_their_owner() {
        let fx = fixture();
        let alice = user(&fx.users, "alice@example.com");
        let bob = user(&fx.users, "bob@example.com");

        let task = fx.tasks.create(&alice, input("Alice's", "")).unwrap();
        assert_eq!(task.user_id, alice);
        assert_eq!(task.owner_email, "alice@example.com");

        assert!(fx.tasks.get(&bob, task.id).unwrap().is_none());
        assert!(fx
            .tasks
            .set_completion(&bob, task.id, Completion::Done)
            .unwrap()
            .is_none());
        assert!(!fx.tasks.delete(&bob, task.id).unwrap());
        assert!(fx.tasks.list(&bob, &TaskQuery::default()).unwrap().is_empty());
        assert_eq!(fx.tasks.list(&alice, &TaskQuery::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_list_filter_search_and_order() {
        let fx = fixture();
        let owner = user(&fx.users, "owner@example.com");
        let start = Utc::now();

        let a = fx
            .tasks
            .create_at(&owner, input("Write report", "quarterly numbers"), start)
            .unwrap();
        fx.tasks
            .create_at(&owner, input("Buy milk", ""), start + Duration::seconds(1))
            .unwrap();
        fx.tasks
            .create_at(&owner, input("Call Bob", "about the REPORT"), start + Duration::seconds(2))
            .unwrap();
        fx.tasks.set_completion(&owner, a.id, Completion::Done).unwrap();

        let newest_first = fx.tasks.list(&owner, &TaskQuery::default()).unwrap();
        let titles: Vec<_> = newest_first.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Call Bob", "Buy milk", "Write report"]);

        let by_title = fx
            .tasks
            .list(
                &owner,
                &TaskQuery {
                    ordering: Some("title".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_title[0].title, "Buy milk");

        let search = fx
            .tasks
            .list(
                &owner,
                &TaskQuery {
                    search: Some("report".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(search.len(), 2);

        let done = fx
            .tasks
            .list(
                &owner,
                &TaskQuery {
                    completed: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, a.id);
    }

    #[test]
    fn test_search_treats_wildcards_literally() {
        let fx = fixture();
        let owner = user(&fx.users, "owner@example.com");
        fx.tasks.create(&owner, input("100% done", "")).unwrap();
        fx.tasks.create(&owner, input("1000 things", "")).unwrap();

        let found = fx
            .tasks
            .list(
                &owner,
                &TaskQuery {
                    search: Some("0%".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "100% done");
    }

    #[test]
    fn test_update_and_completion_state() {
        let fx = fixture();
        let owner = user(&fx.users, "owner@example.com");
        let task = fx.tasks.create(&owner, input("Draft", "v1")).unwrap();

        let patched = fx
            .tasks
            .update(
                &owner,
                task.id,
                TaskPatch {
                    description: Some("v2".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(patched.title, "Draft");
        assert_eq!(patched.description, "v2");

        let replaced = fx
            .tasks
            .replace(&owner, task.id, input("Final", ""))
            .unwrap()
            .unwrap();
        assert_eq!(replaced.title, "Final");
        assert_eq!(replaced.description, "");

        let toggled = fx
            .tasks
            .set_completion(&owner, task.id, Completion::Toggle)
            .unwrap()
            .unwrap();
        assert!(toggled.completed);
        let pending = fx
            .tasks
            .set_completion(&owner, task.id, Completion::Pending)
            .unwrap()
            .unwrap();
        assert!(!pending.completed);

        assert!(fx.tasks.delete(&owner, task.id).unwrap());
        assert!(fx.tasks.get(&owner, task.id).unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let fx = fixture();
        let owner = user(&fx.users, "owner@example.com");
        assert_eq!(fx.tasks.stats(&owner).unwrap(), TaskStats::new(0, 0));

        for title in ["a", "b", "c"] {
            fx.tasks.create(&owner, input(title, "")).unwrap();
        }
        let first = fx.tasks.list(&owner, &TaskQuery::default()).unwrap()[0].id;
        fx.tasks.set_completion(&owner, first, Completion::Done).unwrap();

        let stats = fx.tasks.stats(&owner).unwrap();
        assert_eq!(stats.total_tasks, 3);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.pending_tasks, 2);
        assert_eq!(stats.completion_rate, 33.33);
    }
}
