//! SQL store over SQLx.
//!
//! Supports PostgreSQL, MySQL, and SQLite through the `Any` driver; the
//! database type is sniffed from the connection URL.

mod queries;

use std::collections::HashSet;

use async_trait::async_trait;
use relaygate_core::{epoch_secs, RelayNode};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::info;

use crate::error::StoreError;
use crate::traits::{SessionHandle, Store};

/// Database type enum for query selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Detect database type from URL.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if url.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }
}

/// SQL-backed persistence collaborator.
pub struct SqlStore {
    pool: AnyPool,
    db_type: DatabaseType,
}

impl SqlStore {
    /// Connect to the database behind `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();

        let db_type = DatabaseType::from_url(url).ok_or(StoreError::UnsupportedScheme)?;
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool, db_type })
    }

    /// Startup readiness check: verifies the schema tables exist.
    pub async fn check_ready(&self) -> Result<(), StoreError> {
        for table in ["proxy_tokens", "relay_nodes", "token_sessions"] {
            if !self.table_exists(table).await? {
                return Err(StoreError::MissingTable(table.to_string()));
            }
            info!(table, "store table present");
        }
        Ok(())
    }

    /// Get database type.
    pub fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    fn parse_node_row(row: AnyRow) -> RelayNode {
        RelayNode {
            host: row.try_get("host").unwrap_or_default(),
            port: row.try_get::<i32, _>("port").unwrap_or(0) as u16,
            residential: get_bool(&row, "residential"),
            online: get_bool(&row, "online"),
            created_at: row.try_get("created_at").unwrap_or(0),
            last_checked: row.try_get("last_checked").unwrap_or(0),
        }
    }
}

/// SQLite stores booleans as integers, so try both types.
fn get_bool(row: &AnyRow, column: &str) -> bool {
    row.try_get::<bool, _>(column)
        .or_else(|_| row.try_get::<i32, _>(column).map(|v| v != 0))
        .unwrap_or(false)
}

#[async_trait]
impl Store for SqlStore {
    async fn load_active_tokens(&self) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query(queries::ACTIVE_TOKENS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>("token").ok())
            .collect())
    }

    async fn load_nodes(&self) -> Result<Vec<RelayNode>, StoreError> {
        let rows = sqlx::query(queries::LOAD_NODES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Self::parse_node_row).collect())
    }

    async fn upsert_node(&self, node: &RelayNode) -> Result<(), StoreError> {
        let query = match self.db_type {
            DatabaseType::PostgreSQL | DatabaseType::SQLite => queries::UPSERT_NODE_PG,
            DatabaseType::MySQL => queries::UPSERT_NODE_MYSQL,
        };
        sqlx::query(query)
            .bind(&node.host)
            .bind(node.port as i32)
            .bind(node.residential)
            .bind(node.online)
            .bind(node.created_at)
            .bind(node.last_checked)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_session_start(&self, token: &str) -> Result<SessionHandle, StoreError> {
        let now = epoch_secs();
        match self.db_type {
            DatabaseType::PostgreSQL | DatabaseType::SQLite => {
                let row = sqlx::query(queries::APPEND_SESSION_PG)
                    .bind(token)
                    .bind(now)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(SessionHandle(row.try_get("id").unwrap_or(0)))
            }
            DatabaseType::MySQL => {
                let result = sqlx::query(queries::APPEND_SESSION_MYSQL)
                    .bind(token)
                    .bind(now)
                    .execute(&self.pool)
                    .await?;
                Ok(SessionHandle(result.last_insert_id().unwrap_or(0)))
            }
        }
    }

    async fn close_session(
        &self,
        handle: SessionHandle,
        bytes_up: i64,
        bytes_down: i64,
    ) -> Result<(), StoreError> {
        let query = match self.db_type {
            DatabaseType::PostgreSQL => queries::CLOSE_SESSION_PG,
            DatabaseType::MySQL | DatabaseType::SQLite => queries::CLOSE_SESSION_MYSQL,
        };
        let result = sqlx::query(query)
            .bind(epoch_secs())
            .bind(bytes_up)
            .bind(bytes_down)
            .bind(handle.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownHandle(handle.0));
        }
        Ok(())
    }

    async fn sum_bytes_since(&self, token: &str, since: i64) -> Result<i64, StoreError> {
        let query = match self.db_type {
            DatabaseType::PostgreSQL => queries::SUM_BYTES_PG,
            DatabaseType::MySQL | DatabaseType::SQLite => queries::SUM_BYTES_MYSQL,
        };
        let row = sqlx::query(query)
            .bind(token)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total").unwrap_or(0))
    }

    async fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        match self.db_type {
            DatabaseType::PostgreSQL => {
                let row = sqlx::query(queries::TABLE_EXISTS_PG)
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(get_bool(&row, "present"))
            }
            DatabaseType::MySQL => {
                let row = sqlx::query(queries::TABLE_EXISTS_MYSQL)
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(get_bool(&row, "present"))
            }
            DatabaseType::SQLite => {
                let row = sqlx::query(queries::TABLE_EXISTS_SQLITE)
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(get_bool(&row, "present"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_type_from_url() {
        assert_eq!(
            DatabaseType::from_url("postgres://u:p@localhost/proxy"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_url("mysql://localhost/proxy"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(
            DatabaseType::from_url("sqlite::memory:"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(DatabaseType::from_url("redis://localhost"), None);
    }
}
