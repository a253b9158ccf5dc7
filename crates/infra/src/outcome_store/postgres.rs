//! Postgres-backed outcome store.
//!
//! ## Connection handling
//!
//! Every operation opens its own connection, does its work and closes it again
//! (no pool, no transaction spanning more than one call). A crash mid-cycle
//! therefore leaves at most one in-flight statement or transaction behind,
//! which Postgres rolls back on disconnect.
//!
//! ## Error Mapping
//!
//! | SQLx error | StoreError |
//! |------------|------------|
//! | Io / Tls / Configuration / PoolTimedOut during connect | `Connect` |
//! | ColumnDecode / Decode / ColumnNotFound | `Decode` |
//! | anything else | `Query` |

use core::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{ConnectOptions, Connection, Row};
use tracing::{debug, instrument};

use adlaunch_core::{LaunchKey, LaunchRecord, ProcessedOutcome, WebhookStatus};

use super::r#trait::{NewLaunchQuery, OutcomeStore, RetryQuery, StoreError};
use crate::config::{NotifierConfig, TableName};

/// Postgres outcome store (source table read/delete, outcome table upsert).
#[derive(Debug, Clone)]
pub struct PostgresOutcomeStore {
    options: PgConnectOptions,
    source_table: TableName,
    processed_table: TableName,
}

impl PostgresOutcomeStore {
    /// Parse the connection string once; connections are opened per operation.
    pub fn new(config: &NotifierConfig) -> Result<Self, StoreError> {
        let url = config.database_url.trim();
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(StoreError::Config(
                "DATABASE_URL must use the postgres:// scheme".to_string(),
            ));
        }
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| StoreError::Config(format!("DATABASE_URL: {e}")))?;
        Ok(Self {
            options,
            source_table: config.source_table.clone(),
            processed_table: config.processed_table.clone(),
        })
    }

    async fn connect(&self, operation: &'static str) -> Result<PgConnection, StoreError> {
        self.options
            .connect()
            .await
            .map_err(|e| StoreError::Connect {
                operation,
                message: e.to_string(),
            })
    }

    /// Close politely; a failed close only loses the goodbye message.
    async fn release(conn: PgConnection, operation: &'static str) {
        if let Err(e) = conn.close().await {
            debug!(operation, error = %e, "store connection close failed");
        }
    }

    fn schema_statements(&self) -> [String; 2] {
        let table = &self.processed_table;
        let index = index_name(table);
        [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    launch_key TEXT PRIMARY KEY,
                    processed_at TIMESTAMPTZ DEFAULT NOW(),
                    campaign_id TEXT,
                    adset_id TEXT,
                    creative_id TEXT,
                    ad_id TEXT,
                    ad_name TEXT,
                    webhook_status TEXT
                )
                "#
            ),
            format!("CREATE INDEX IF NOT EXISTS {index} ON {table} (processed_at DESC)"),
        ]
    }

    fn select_new_sql(&self) -> String {
        format!(
            r#"
            SELECT
                l.launch_key::text AS launch_key,
                l.campaign_id::text AS campaign_id,
                l.adset_id::text AS adset_id,
                l.creative_id::text AS creative_id,
                l.ad_id::text AS ad_id,
                l.created_at::timestamptz AS created_at
            FROM {source} l
            LEFT JOIN {processed} p ON l.launch_key::text = p.launch_key
            WHERE ($1::timestamptz IS NULL OR l.created_at > $1)
              AND (
                    p.launch_key IS NULL
                 OR (p.webhook_status = 'failed'
                     AND ($2::timestamptz IS NULL OR p.processed_at <= $2))
              )
            ORDER BY l.created_at DESC
            LIMIT $3
            "#,
            source = self.source_table,
            processed = self.processed_table,
        )
    }

    fn select_retries_sql(&self) -> String {
        format!(
            r#"
            SELECT
                launch_key,
                campaign_id,
                adset_id,
                creative_id,
                ad_id,
                ad_name,
                processed_at,
                webhook_status
            FROM {processed}
            WHERE webhook_status = 'failed'
              AND processed_at <= $1
            ORDER BY processed_at ASC
            LIMIT $2
            "#,
            processed = self.processed_table,
        )
    }

    fn upsert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO {processed} (
                launch_key,
                campaign_id,
                adset_id,
                creative_id,
                ad_id,
                ad_name,
                webhook_status,
                processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (launch_key)
            DO UPDATE SET
                campaign_id = EXCLUDED.campaign_id,
                adset_id = EXCLUDED.adset_id,
                creative_id = EXCLUDED.creative_id,
                ad_id = EXCLUDED.ad_id,
                ad_name = EXCLUDED.ad_name,
                webhook_status = EXCLUDED.webhook_status,
                processed_at = EXCLUDED.processed_at
            "#,
            processed = self.processed_table,
        )
    }

    fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {source} WHERE launch_key::text = ANY($1)",
            source = self.source_table,
        )
    }
}

#[async_trait]
impl OutcomeStore for PostgresOutcomeStore {
    #[instrument(skip(self), err)]
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        const OP: &str = "ensure_schema";
        let mut conn = self.connect(OP).await?;

        let result = async {
            let mut tx = conn.begin().await.map_err(|e| map_sqlx_error(OP, e))?;
            for statement in self.schema_statements() {
                sqlx::query(&statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(OP, e))?;
            }
            tx.commit().await.map_err(|e| map_sqlx_error(OP, e))
        }
        .await;

        Self::release(conn, OP).await;
        result
    }

    #[instrument(skip(self), fields(limit = query.limit), err)]
    async fn select_new(&self, query: &NewLaunchQuery) -> Result<Vec<LaunchRecord>, StoreError> {
        const OP: &str = "select_new";
        let sql = self.select_new_sql();
        let limit = sql_limit(OP, query.limit)?;
        let mut conn = self.connect(OP).await?;

        let rows = sqlx::query(&sql)
            .bind(query.created_after())
            .bind(query.failed_before())
            .bind(limit)
            .fetch_all(&mut conn)
            .await
            .map_err(|e| map_sqlx_error(OP, e));

        Self::release(conn, OP).await;
        rows?.iter().map(|r| launch_from_row(OP, r)).collect()
    }

    #[instrument(skip(self), fields(limit = query.limit), err)]
    async fn select_retries(
        &self,
        query: &RetryQuery,
    ) -> Result<Vec<ProcessedOutcome>, StoreError> {
        const OP: &str = "select_retries";
        let sql = self.select_retries_sql();
        let limit = sql_limit(OP, query.limit)?;
        let mut conn = self.connect(OP).await?;

        let rows = sqlx::query(&sql)
            .bind(query.failed_before())
            .bind(limit)
            .fetch_all(&mut conn)
            .await
            .map_err(|e| map_sqlx_error(OP, e));

        Self::release(conn, OP).await;
        rows?.iter().map(|r| outcome_from_row(OP, r)).collect()
    }

    #[instrument(skip(self, outcomes), fields(rows = outcomes.len()), err)]
    async fn upsert_outcomes(&self, outcomes: &[ProcessedOutcome]) -> Result<usize, StoreError> {
        const OP: &str = "upsert_outcomes";
        if outcomes.is_empty() {
            return Ok(0);
        }

        let sql = self.upsert_sql();
        let mut conn = self.connect(OP).await?;

        let result = async {
            let mut tx = conn.begin().await.map_err(|e| map_sqlx_error(OP, e))?;
            for o in outcomes {
                sqlx::query(&sql)
                    .bind(o.launch_key.as_str())
                    .bind(o.campaign_id.as_deref())
                    .bind(o.adset_id.as_deref())
                    .bind(o.creative_id.as_deref())
                    .bind(o.ad_id.as_deref())
                    .bind(o.ad_name.as_deref())
                    .bind(o.webhook_status.as_str())
                    .bind(o.processed_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(OP, e))?;
            }
            tx.commit().await.map_err(|e| map_sqlx_error(OP, e))?;
            Ok(outcomes.len())
        }
        .await;

        Self::release(conn, OP).await;
        result
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()), err)]
    async fn delete_launches(&self, keys: &[LaunchKey]) -> Result<u64, StoreError> {
        const OP: &str = "delete_launches";
        if keys.is_empty() {
            return Ok(0);
        }

        let sql = self.delete_sql();
        let keys: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        let mut conn = self.connect(OP).await?;

        let result = sqlx::query(&sql)
            .bind(keys)
            .execute(&mut conn)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| map_sqlx_error(OP, e));

        Self::release(conn, OP).await;
        result
    }
}

/// `LIMIT` parameter; Postgres rejects anything outside `i64`.
fn sql_limit(operation: &'static str, limit: usize) -> Result<i64, StoreError> {
    i64::try_from(limit)
        .map_err(|_| StoreError::Config(format!("{operation}: limit {limit} is too large")))
}

/// `idx_processed_at` for the default table, suffixed for custom tables so two
/// notifiers sharing a schema do not collide.
fn index_name(table: &TableName) -> String {
    let bare = table.as_str().rsplit('.').next().unwrap_or(table.as_str());
    if bare == crate::config::DEFAULT_PROCESSED_TABLE {
        "idx_processed_at".to_string()
    } else {
        format!("idx_{bare}_processed_at")
    }
}

fn launch_from_row(operation: &'static str, row: &PgRow) -> Result<LaunchRecord, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode {
        operation,
        message: e.to_string(),
    };

    let raw_key: String = row.try_get("launch_key").map_err(decode)?;
    let launch_key = LaunchKey::new(raw_key).map_err(|e| StoreError::Decode {
        operation,
        message: e.to_string(),
    })?;

    Ok(LaunchRecord {
        launch_key,
        campaign_id: row.try_get("campaign_id").map_err(decode)?,
        adset_id: row.try_get("adset_id").map_err(decode)?,
        creative_id: row.try_get("creative_id").map_err(decode)?,
        ad_id: row.try_get("ad_id").map_err(decode)?,
        created_at: row
            .try_get::<Option<DateTime<Utc>>, _>("created_at")
            .map_err(decode)?,
    })
}

fn outcome_from_row(
    operation: &'static str,
    row: &PgRow,
) -> Result<ProcessedOutcome, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode {
        operation,
        message: e.to_string(),
    };
    let domain = |e: adlaunch_core::DomainError| StoreError::Decode {
        operation,
        message: e.to_string(),
    };

    let raw_key: String = row.try_get("launch_key").map_err(decode)?;
    let raw_status: String = row.try_get("webhook_status").map_err(decode)?;
    let processed_at: Option<DateTime<Utc>> = row.try_get("processed_at").map_err(decode)?;

    Ok(ProcessedOutcome {
        launch_key: LaunchKey::new(raw_key).map_err(domain)?,
        processed_at: processed_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
        campaign_id: row.try_get("campaign_id").map_err(decode)?,
        adset_id: row.try_get("adset_id").map_err(decode)?,
        creative_id: row.try_get("creative_id").map_err(decode)?,
        ad_id: row.try_get("ad_id").map_err(decode)?,
        ad_name: row.try_get("ad_name").map_err(decode)?,
        webhook_status: raw_status.parse::<WebhookStatus>().map_err(domain)?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StoreError::Connect {
            operation,
            message: err.to_string(),
        },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => StoreError::Decode {
            operation,
            message: err.to_string(),
        },
        sqlx::Error::Database(db_err) => StoreError::Query {
            operation,
            message: match db_err.code() {
                Some(code) => format!("{} (sqlstate {})", db_err.message(), code),
                None => db_err.message().to_string(),
            },
        },
        other => StoreError::Query {
            operation,
            message: other.to_string(),
        },
    }
}
