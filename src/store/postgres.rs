//! PostgreSQL relation store for production use.
//!
//! Edges live in `pidrelations_relation`, keyed by
//! `(parent_id, child_id, relation_kind)`. A transaction takes a
//! transaction-scoped advisory lock on its sibling group, plus one per
//! `(child, kind)` when a parents bound is checked, so the locking scheme
//! matches the in-memory store.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use std::collections::BTreeSet;
use std::hash::Hasher;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;
use xxhash_rust::xxh64::Xxh64;

use crate::types::{Order, PidId, Relation, SiblingGroup};
use super::{Direction, RelationStore, RelationTxn, StoreError};

/// Table holding every edge.
pub const RELATION_TABLE: &str = "pidrelations_relation";

const SELECT_COLUMNS: &str = "parent_id, child_id, relation_kind, position, created_at";

/// Configuration for PostgreSQL connection pool.
///
/// Production defaults:
/// - Pool size balances concurrency with connection limits
/// - Timeouts are aggressive to fail fast
/// - Idle timeout releases unused connections
/// - Max lifetime forces periodic reconnection for health
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/pidrelations".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// PostgreSQL relation store.
///
/// Uses connection pooling with production-tuned settings.
#[derive(Debug, Clone)]
pub struct PostgresRelationStore {
    pool: PgPool,
}

impl PostgresRelationStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the relation table and its indexes if missing.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {RELATION_TABLE} (
                    parent_id UUID NOT NULL,
                    child_id UUID NOT NULL,
                    relation_kind TEXT NOT NULL,
                    position INTEGER CHECK (position >= 0),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    CONSTRAINT {RELATION_TABLE}_pkey PRIMARY KEY (parent_id, child_id, relation_kind)
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {RELATION_TABLE}_child_idx
                 ON {RELATION_TABLE} (child_id, relation_kind)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {RELATION_TABLE}_position_idx
                 ON {RELATION_TABLE} (parent_id, relation_kind, position)"
            ),
        ];
        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!(table = RELATION_TABLE, "Relation schema ready");
        Ok(())
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    async fn fetch_relations(&self, sql: &str, a: Uuid, kind: &str) -> Result<Vec<Relation>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(a)
            .bind(kind)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_relation).collect()
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// Transaction over one sibling group of a [`PostgresRelationStore`].
///
/// Dropping it without commit rolls back and releases the advisory locks.
pub struct PostgresTxn {
    group: SiblingGroup,
    tx: Transaction<'static, Postgres>,
    locked_children: BTreeSet<PidId>,
}

impl PostgresTxn {
    async fn advisory_lock(&mut self, key: i64) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    fn conflict(&self, child: PidId) -> StoreError {
        StoreError::Conflict {
            parent: self.group.parent,
            child,
            kind: self.group.kind.clone(),
        }
    }

    fn not_found(&self, child: PidId) -> StoreError {
        StoreError::NotFound {
            parent: self.group.parent,
            child,
            kind: self.group.kind.clone(),
        }
    }
}

#[async_trait]
impl RelationTxn for PostgresTxn {
    fn group(&self) -> &SiblingGroup {
        &self.group
    }

    async fn siblings(&mut self) -> Result<Vec<Relation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM {RELATION_TABLE}
             WHERE parent_id = $1 AND relation_kind = $2
             ORDER BY position ASC NULLS LAST, child_id"
        ))
        .bind(self.group.parent.as_uuid())
        .bind(&self.group.kind)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(parse_relation).collect()
    }

    async fn child_count(&mut self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {RELATION_TABLE} WHERE parent_id = $1 AND relation_kind = $2"
        ))
        .bind(self.group.parent.as_uuid())
        .bind(&self.group.kind)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn lock_child(&mut self, child: PidId) -> Result<(), StoreError> {
        if self.locked_children.insert(child) {
            let key = lock_key("child", child, &self.group.kind);
            self.advisory_lock(key).await?;
        }
        Ok(())
    }

    async fn parent_count(&mut self, child: PidId) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {RELATION_TABLE} WHERE child_id = $1 AND relation_kind = $2"
        ))
        .bind(child.as_uuid())
        .bind(&self.group.kind)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn create(&mut self, child: PidId, position: Option<u32>) -> Result<Relation, StoreError> {
        let relation = Relation::new(self.group.parent, child, self.group.kind.clone(), position);
        let result = sqlx::query(&format!(
            "INSERT INTO {RELATION_TABLE} ({SELECT_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(relation.parent.as_uuid())
        .bind(relation.child.as_uuid())
        .bind(&relation.kind)
        .bind(position_to_db(position)?)
        .bind(relation.created_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(relation),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(self.conflict(child))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&mut self, child: PidId) -> Result<Relation, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM {RELATION_TABLE}
             WHERE parent_id = $1 AND child_id = $2 AND relation_kind = $3
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(self.group.parent.as_uuid())
        .bind(child.as_uuid())
        .bind(&self.group.kind)
        .fetch_optional(&mut *self.tx)
        .await?;
        match row {
            Some(ref r) => parse_relation(r),
            None => Err(self.not_found(child)),
        }
    }

    async fn set_position(&mut self, child: PidId, position: Option<u32>) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE {RELATION_TABLE} SET position = $4
             WHERE parent_id = $1 AND child_id = $2 AND relation_kind = $3"
        ))
        .bind(self.group.parent.as_uuid())
        .bind(child.as_uuid())
        .bind(&self.group.kind)
        .bind(position_to_db(position)?)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.not_found(child));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        tracing::debug!(
            parent = %self.group.parent,
            kind = %self.group.kind,
            "Rolling back PostgreSQL relation transaction"
        );
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl RelationStore for PostgresRelationStore {
    type Txn = PostgresTxn;

    async fn begin(&self, group: &SiblingGroup) -> Result<Self::Txn, StoreError> {
        let tx = self.pool.begin().await?;
        let mut txn = PostgresTxn {
            group: group.clone(),
            tx,
            locked_children: BTreeSet::new(),
        };
        txn.advisory_lock(lock_key("group", group.parent, &group.kind)).await?;
        Ok(txn)
    }

    async fn get(&self, parent: PidId, child: PidId, kind: &str) -> Result<Option<Relation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM {RELATION_TABLE}
             WHERE parent_id = $1 AND child_id = $2 AND relation_kind = $3"
        ))
        .bind(parent.as_uuid())
        .bind(child.as_uuid())
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_relation).transpose()
    }

    async fn children(&self, parent: PidId, kind: &str, order: Option<Order>) -> Result<Vec<Relation>, StoreError> {
        let sql = match order {
            None => format!(
                "SELECT {SELECT_COLUMNS} FROM {RELATION_TABLE}
                 WHERE parent_id = $1 AND relation_kind = $2
                 ORDER BY position ASC NULLS LAST, child_id"
            ),
            Some(order) => format!(
                "SELECT {SELECT_COLUMNS} FROM {RELATION_TABLE}
                 WHERE parent_id = $1 AND relation_kind = $2 AND position IS NOT NULL
                 ORDER BY position {dir}, child_id {dir}",
                dir = sql_direction(order)
            ),
        };
        self.fetch_relations(&sql, parent.as_uuid(), kind).await
    }

    async fn parents(&self, child: PidId, kind: &str) -> Result<Vec<Relation>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {RELATION_TABLE}
             WHERE child_id = $1 AND relation_kind = $2
             ORDER BY parent_id"
        );
        self.fetch_relations(&sql, child.as_uuid(), kind).await
    }

    async fn has_children(&self, parent: PidId, kind: &str) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {RELATION_TABLE} WHERE parent_id = $1 AND relation_kind = $2)"
        ))
        .bind(parent.as_uuid())
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn has_parents(&self, child: PidId, kind: &str) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {RELATION_TABLE} WHERE child_id = $1 AND relation_kind = $2)"
        ))
        .bind(child.as_uuid())
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn neighbor(
        &self,
        parent: PidId,
        kind: &str,
        position: u32,
        direction: Direction,
    ) -> Result<Option<Relation>, StoreError> {
        let (cmp, dir) = match direction {
            Direction::Next => (">", "ASC"),
            Direction::Previous => ("<", "DESC"),
        };
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM {RELATION_TABLE}
             WHERE parent_id = $1 AND relation_kind = $2 AND position {cmp} $3
             ORDER BY position {dir}
             LIMIT 1"
        ))
        .bind(parent.as_uuid())
        .bind(kind)
        .bind(position_to_db(Some(position))?)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_relation).transpose()
    }

    async fn boundary(&self, parent: PidId, kind: &str, order: Order) -> Result<Option<Relation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM {RELATION_TABLE}
             WHERE parent_id = $1 AND relation_kind = $2 AND position IS NOT NULL
             ORDER BY position {}
             LIMIT 1",
            sql_direction(order)
        ))
        .bind(parent.as_uuid())
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_relation).transpose()
    }

    async fn relations_of(&self, pid: PidId) -> Result<Vec<Relation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM {RELATION_TABLE}
             WHERE parent_id = $1 OR child_id = $1
             ORDER BY relation_kind, position ASC NULLS LAST, parent_id, child_id"
        ))
        .bind(pid.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_relation).collect()
    }
}

/// SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

fn sql_direction(order: Order) -> &'static str {
    match order {
        Order::Asc => "ASC",
        Order::Desc => "DESC",
    }
}

/// Advisory lock key for a sibling group or a `(child, kind)` pair.
fn lock_key(scope: &str, pid: PidId, kind: &str) -> i64 {
    let mut hasher = Xxh64::new(0);
    hasher.write(scope.as_bytes());
    hasher.write(pid.as_uuid().as_bytes());
    hasher.write(kind.as_bytes());
    i64::from_ne_bytes(hasher.finish().to_ne_bytes())
}

fn position_to_db(position: Option<u32>) -> Result<Option<i32>, StoreError> {
    position
        .map(|p| {
            i32::try_from(p).map_err(|_| StoreError::Backend(format!("position {p} out of range")))
        })
        .transpose()
}

fn parse_relation(row: &PgRow) -> Result<Relation, StoreError> {
    let parent: Uuid = row.try_get("parent_id")?;
    let child: Uuid = row.try_get("child_id")?;
    let kind: String = row.try_get("relation_kind")?;
    let position: Option<i32> = row.try_get("position")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    let position = position
        .map(|p| u32::try_from(p).map_err(|_| StoreError::Backend(format!("negative position {p}"))))
        .transpose()?;
    Ok(Relation {
        parent: PidId::new(parent),
        child: PidId::new(child),
        kind,
        position,
        created_at,
    })
}
