//! SQLite storage implementation.
//!
//! Every entity kind is a table with a TEXT primary key and a JSON
//! `document` column, plus the property columns the list queries filter on.
//! This keeps the store a keyed document store: readers always get the
//! whole record, writers always replace it.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::models::*;
use crate::credentials::AppAuthenticationStorage;
use crate::error::{Error, Result};
use crate::execution::{ExecutionRequestWrapper, WorkflowExecution};
use crate::workflow::Workflow;

/// SQLite-backed document store.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                org_id TEXT NOT NULL,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_executions (
                execution_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_queue (
                environment TEXT PRIMARY KEY,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY,
                org TEXT NOT NULL,
                environment TEXT NOT NULL,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS app_auth (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS environments (
                name TEXT NOT NULL,
                org_id TEXT NOT NULL,
                document TEXT NOT NULL,
                PRIMARY KEY (org_id, name)
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                api_key TEXT NOT NULL,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_apps (
                id TEXT PRIMARY KEY,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS global_statistics (
                fieldname TEXT PRIMARY KEY,
                document TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS example_results (
                example_id TEXT PRIMARY KEY,
                document TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_workflows_owner ON workflows(owner);
            CREATE INDEX IF NOT EXISTS idx_workflows_org ON workflows(org_id);
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
                ON workflow_executions(workflow_id, started_at DESC);
            CREATE INDEX IF NOT EXISTS idx_schedules_org ON schedules(org);
            CREATE INDEX IF NOT EXISTS idx_app_auth_org ON app_auth(org_id);
            CREATE INDEX IF NOT EXISTS idx_users_api_key ON users(api_key);
            "#,
        )?;
        Ok(())
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(Error::from)
    }

    fn decode<T: serde::de::DeserializeOwned>(document: &str) -> Result<T> {
        serde_json::from_str(document)
            .map_err(|e| Error::Storage(format!("Failed decoding stored document: {}", e)))
    }

    // ========================================================================
    // Workflows
    // ========================================================================

    pub async fn set_workflow(&self, workflow: &Workflow) -> Result<()> {
        if workflow.id.is_empty() {
            return Err(Error::Workflow("Workflow id can't be empty".to_string()));
        }

        let document = Self::encode(workflow)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflows (id, owner, org_id, document)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 owner = excluded.owner,
                 org_id = excluded.org_id,
                 document = excluded.document",
            params![workflow.id, workflow.owner, workflow.org_id, document],
        )?;
        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let conn = self.conn.lock().await;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM workflows WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        document.map(|d| Self::decode(&d)).transpose()
    }

    pub async fn get_workflows_for_owner(&self, owner: &str) -> Result<Vec<Workflow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT document FROM workflows WHERE owner = ?1")?;
        let rows = stmt
            .query_map([owner], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter().map(|d| Self::decode(d)).collect()
    }

    pub async fn get_workflows_for_org(&self, org_id: &str) -> Result<Vec<Workflow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT document FROM workflows WHERE org_id = ?1")?;
        let rows = stmt
            .query_map([org_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter().map(|d| Self::decode(d)).collect()
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM workflows WHERE id = ?1", [id])?;
        Ok(())
    }

    // ========================================================================
    // Executions
    // ========================================================================

    pub async fn set_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        if execution.execution_id.is_empty() {
            return Err(Error::Execution(
                "ExecutionId can't be empty".to_string(),
            ));
        }

        let document = Self::encode(execution)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflow_executions (execution_id, workflow_id, started_at, document)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(execution_id) DO UPDATE SET
                 workflow_id = excluded.workflow_id,
                 started_at = excluded.started_at,
                 document = excluded.document",
            params![
                execution.execution_id,
                execution.workflow_id,
                execution.started_at,
                document
            ],
        )?;
        Ok(())
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        let conn = self.conn.lock().await;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM workflow_executions WHERE execution_id = ?1",
                [execution_id],
                |row| row.get(0),
            )
            .optional()?;

        document.map(|d| Self::decode(&d)).transpose()
    }

    pub async fn delete_execution(&self, execution_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM workflow_executions WHERE execution_id = ?1",
            [execution_id],
        )?;
        Ok(())
    }

    /// Recent executions for a workflow, newest first.
    pub async fn list_executions(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT document FROM workflow_executions
             WHERE workflow_id = ?1
             ORDER BY started_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![workflow_id, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter().map(|d| Self::decode(d)).collect()
    }

    // ========================================================================
    // Queue inbox
    // ========================================================================

    pub async fn get_queue(&self, environment: &str) -> Result<Option<ExecutionRequestWrapper>> {
        let conn = self.conn.lock().await;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM workflow_queue WHERE environment = ?1",
                [environment],
                |row| row.get(0),
            )
            .optional()?;

        document.map(|d| Self::decode(&d)).transpose()
    }

    pub async fn set_queue(
        &self,
        environment: &str,
        wrapper: &ExecutionRequestWrapper,
    ) -> Result<()> {
        let document = Self::encode(wrapper)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflow_queue (environment, document)
             VALUES (?1, ?2)
             ON CONFLICT(environment) DO UPDATE SET document = excluded.document",
            params![environment, document],
        )?;
        Ok(())
    }

    // ========================================================================
    // Schedules
    // ========================================================================

    pub async fn set_schedule(&self, schedule: &ScheduleRecord) -> Result<()> {
        let document = Self::encode(schedule)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO schedules (id, org, environment, document)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 org = excluded.org,
                 environment = excluded.environment,
                 document = excluded.document",
            params![schedule.id, schedule.org, schedule.environment, document],
        )?;
        Ok(())
    }

    pub async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleRecord>> {
        let conn = self.conn.lock().await;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM schedules WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        document.map(|d| Self::decode(&d)).transpose()
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM schedules WHERE id = ?1", [id])?;
        Ok(())
    }

    pub async fn list_schedules(&self, org: Option<&str>) -> Result<Vec<ScheduleRecord>> {
        let conn = self.conn.lock().await;
        let rows = match org {
            Some(org) => {
                let mut stmt = conn.prepare("SELECT document FROM schedules WHERE org = ?1")?;
                let rows = stmt
                    .query_map([org], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare("SELECT document FROM schedules")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        rows.iter().map(|d| Self::decode(d)).collect()
    }

    // ========================================================================
    // App credentials
    // ========================================================================

    pub async fn set_app_auth(&self, auth: &AppAuthenticationStorage) -> Result<()> {
        let document = Self::encode(auth)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO app_auth (id, org_id, document)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 org_id = excluded.org_id,
                 document = excluded.document",
            params![auth.id, auth.org_id, document],
        )?;
        Ok(())
    }

    pub async fn get_all_app_auth(&self, org_id: &str) -> Result<Vec<AppAuthenticationStorage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT document FROM app_auth WHERE org_id = ?1")?;
        let rows = stmt
            .query_map([org_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter().map(|d| Self::decode(d)).collect()
    }

    // ========================================================================
    // Environments
    // ========================================================================

    pub async fn set_environment(&self, environment: &Environment) -> Result<()> {
        let document = Self::encode(environment)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO environments (name, org_id, document)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(org_id, name) DO UPDATE SET document = excluded.document",
            params![environment.name, environment.org_id, document],
        )?;
        Ok(())
    }

    pub async fn get_environments(&self, org_id: &str) -> Result<Vec<Environment>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT document FROM environments WHERE org_id = ?1")?;
        let rows = stmt
            .query_map([org_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter().map(|d| Self::decode(d)).collect()
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn set_user(&self, user: &User) -> Result<()> {
        // api_key is skipped by the wire serializer, so persist it in its
        // own column and splice it back on load.
        let document = Self::encode(user)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, api_key, document)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 api_key = excluded.api_key,
                 document = excluded.document",
            params![user.id, user.api_key, document],
        )?;
        Ok(())
    }

    pub async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT api_key, document FROM users WHERE api_key = ?1",
                [api_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((key, document)) => {
                let mut user: User = Self::decode(&document)?;
                user.api_key = key;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // App registry
    // ========================================================================

    pub async fn set_app(&self, app: &WorkflowApp) -> Result<()> {
        let document = Self::encode(app)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflow_apps (id, document)
             VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET document = excluded.document",
            params![app.id, document],
        )?;
        Ok(())
    }

    pub async fn get_all_apps(&self) -> Result<Vec<WorkflowApp>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT document FROM workflow_apps")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter().map(|d| Self::decode(d)).collect()
    }

    // ========================================================================
    // Statistics + examples
    // ========================================================================

    pub async fn get_statistic(&self, fieldname: &str) -> Result<Option<StatisticsItem>> {
        let conn = self.conn.lock().await;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM global_statistics WHERE fieldname = ?1",
                [fieldname],
                |row| row.get(0),
            )
            .optional()?;

        document.map(|d| Self::decode(&d)).transpose()
    }

    pub async fn set_statistic(&self, item: &StatisticsItem) -> Result<()> {
        let document = Self::encode(item)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO global_statistics (fieldname, document)
             VALUES (?1, ?2)
             ON CONFLICT(fieldname) DO UPDATE SET document = excluded.document",
            params![item.fieldname, document],
        )?;
        Ok(())
    }

    pub async fn set_example_result(&self, example: &AppExecutionExample) -> Result<()> {
        let document = Self::encode(example)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO example_results (example_id, document)
             VALUES (?1, ?2)
             ON CONFLICT(example_id) DO UPDATE SET document = excluded.document",
            params![example.example_id, document],
        )?;
        Ok(())
    }

    pub async fn get_example_result(
        &self,
        example_id: &str,
    ) -> Result<Option<AppExecutionExample>> {
        let conn = self.conn.lock().await;
        let document: Option<String> = conn
            .query_row(
                "SELECT document FROM example_results WHERE example_id = ?1",
                [example_id],
                |row| row.get(0),
            )
            .optional()?;

        document.map(|d| Self::decode(&d)).transpose()
    }

    /// Liveness probe: the db answers a trivial query.
    pub async fn check_health(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }
}
