//! Optional PostgreSQL audit trail of terminal transaction records

use crate::config::AuditConfig;
use crate::error::{OperatorError, OperatorResult};
use crate::tx::TransactionRecord;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

/// Flattened row as stored in `tx_audit`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub kind: String,
    pub from_address: String,
    pub to_address: String,
    pub nonce: i64,
    pub state: String,
    pub tx_hash: Option<String>,
    pub attempts: serde_json::Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_record(record: &TransactionRecord) -> OperatorResult<Self> {
        let attempts = serde_json::to_value(&record.attempts)
            .map_err(|e| OperatorError::Internal(e.to_string()))?;

        Ok(Self {
            id: record.id,
            kind: record.intent.kind.to_string(),
            from_address: format!("{:?}", record.from),
            to_address: format!("{:?}", record.intent.to),
            nonce: record.nonce as i64,
            state: record.state.as_str().to_string(),
            tx_hash: record.tx_hash.map(|h| format!("{:?}", h)),
            attempts,
            error: record.error.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Audit log writer
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    /// Connect to the configured database
    pub async fn connect(config: &AuditConfig) -> OperatorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the audit table if missing
    pub async fn run_migrations(&self) -> OperatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tx_audit (
                id UUID PRIMARY KEY,
                kind VARCHAR(32) NOT NULL,
                from_address VARCHAR(42) NOT NULL,
                to_address VARCHAR(42) NOT NULL,
                nonce BIGINT NOT NULL,
                state VARCHAR(20) NOT NULL,
                tx_hash VARCHAR(66),
                attempts JSONB NOT NULL,
                error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tx_audit_from_nonce
            ON tx_audit (from_address, nonce)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Audit migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> OperatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert a terminal record
    pub async fn record(&self, record: &TransactionRecord) -> OperatorResult<()> {
        let entry = AuditEntry::from_record(record)?;

        sqlx::query(
            r#"
            INSERT INTO tx_audit
                (id, kind, from_address, to_address, nonce, state, tx_hash, attempts, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id)
            DO UPDATE SET state = $6, tx_hash = $7, attempts = $8, error = $9, updated_at = $11
            "#,
        )
        .bind(entry.id)
        .bind(&entry.kind)
        .bind(&entry.from_address)
        .bind(&entry.to_address)
        .bind(entry.nonce)
        .bind(&entry.state)
        .bind(&entry.tx_hash)
        .bind(&entry.attempts)
        .bind(&entry.error)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(record_id = %entry.id, state = %entry.state, "Audit record written");
        Ok(())
    }

    /// Look up an audited record
    pub async fn fetch(&self, id: Uuid) -> OperatorResult<Option<AuditEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, kind, from_address, to_address, nonce, state, tx_hash, attempts, error,
                   created_at, updated_at
            FROM tx_audit WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| AuditEntry {
            id: r.get("id"),
            kind: r.get("kind"),
            from_address: r.get("from_address"),
            to_address: r.get("to_address"),
            nonce: r.get("nonce"),
            state: r.get("state"),
            tx_hash: r.get("tx_hash"),
            attempts: r.get("attempts"),
            error: r.get("error"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }
}
