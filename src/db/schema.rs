use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Result};

use super::models::Todo;
use crate::util::now_ms;

/// SQLite store for todos and their outline nodes.
///
/// The layout mirrors the wire model: each node row carries its own child
/// list as a JSON array, and the todo row carries the root order.
pub struct Database {
    conn: Mutex<Connection>,
    path: String,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path)?;
        let db = Database { conn: Mutex::new(conn), path: path_str };
        db.init()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn), path: ":memory:".to_string() };
        db.init()?;
        Ok(db)
    }

    pub fn get_path(&self) -> String {
        self.path.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn init(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS todos (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                -- Root order: JSON array of node ids
                root_nodes TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS todo_nodes (
                id TEXT PRIMARY KEY,
                todo_id TEXT NOT NULL REFERENCES todos(id) ON DELETE CASCADE,
                content TEXT NOT NULL DEFAULT '',
                note TEXT,
                completed INTEGER NOT NULL DEFAULT 0,
                collapsed INTEGER NOT NULL DEFAULT 0,
                -- Child order: JSON array of node ids
                children TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_todos_user_id ON todos(user_id);
            CREATE INDEX IF NOT EXISTS idx_todo_nodes_todo_id ON todo_nodes(todo_id);

            PRAGMA foreign_keys = ON;
            ",
        )?;

        // Migration: the note column arrived after the first release
        let has_note: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('todo_nodes') WHERE name = 'note'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_note {
            conn.execute("ALTER TABLE todo_nodes ADD COLUMN note TEXT", [])?;
        }

        Ok(())
    }

    /// Create an empty todo for a user. New todos start with a single empty
    /// root node so the outline is editable right away.
    pub fn create_todo(&self, user_id: &str, name: &str) -> Result<Todo> {
        let id = uuid::Uuid::new_v4().to_string();
        let node_id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        let root_nodes = vec![node_id.clone()];
        let root_json = serde_json::to_string(&root_nodes).unwrap_or_else(|_| "[]".to_string());

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO todos (id, user_id, name, root_nodes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, user_id, name, root_json, now],
        )?;
        tx.execute(
            "INSERT INTO todo_nodes (id, todo_id, content, children) VALUES (?1, ?2, '', '[]')",
            params![node_id, id],
        )?;
        tx.commit()?;

        Ok(Todo {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            root_nodes,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a todo, scoped to its owner. Returns None when the todo does
    /// not exist or belongs to someone else.
    pub fn get_todo(&self, todo_id: &str, user_id: &str) -> Result<Option<Todo>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT id, user_id, name, root_nodes, created_at, updated_at
             FROM todos WHERE id = ?1 AND user_id = ?2",
            params![todo_id, user_id],
            row_to_todo,
        )
        .optional()
    }

    pub fn list_todos(&self, user_id: &str) -> Result<Vec<Todo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, root_nodes, created_at, updated_at
             FROM todos WHERE user_id = ?1 ORDER BY updated_at DESC",
        )?;
        let todos = stmt
            .query_map(params![user_id], row_to_todo)?
            .collect::<Result<Vec<_>>>()?;
        Ok(todos)
    }

    pub fn rename_todo(&self, todo_id: &str, user_id: &str, name: &str) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE todos SET name = ?3, updated_at = ?4 WHERE id = ?1 AND user_id = ?2",
            params![todo_id, user_id, name, now_ms()],
        )?;
        Ok(changed > 0)
    }

    /// Delete a todo and all of its nodes.
    pub fn delete_todo(&self, todo_id: &str, user_id: &str) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let owned: Option<String> = tx
            .query_row(
                "SELECT id FROM todos WHERE id = ?1 AND user_id = ?2",
                params![todo_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Ok(false);
        }
        tx.execute("DELETE FROM todo_nodes WHERE todo_id = ?1", params![todo_id])?;
        tx.execute("DELETE FROM todos WHERE id = ?1", params![todo_id])?;
        tx.commit()?;
        Ok(true)
    }

    pub fn count_nodes(&self, todo_id: &str) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM todo_nodes WHERE todo_id = ?1",
            params![todo_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn row_to_todo(row: &rusqlite::Row) -> Result<Todo> {
    let root_json: String = row.get(3)?;
    Ok(Todo {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        root_nodes: serde_json::from_str(&root_json).unwrap_or_default(),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
