use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::error;

use crate::error::JournalError;
use crate::store::TransactionJournal;
use crate::transaction::BridgeTransaction;

pub mod models;

pub use models::*;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, JournalError> {
    serde_json::to_string(value).map_err(|e| JournalError(e.to_string()))
}

/// PostgreSQL-backed transaction journal
#[derive(Clone)]
pub struct PgJournal {
    pool: PgPool,
}

impl PgJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionJournal for PgJournal {
    async fn record(&self, tx: &BridgeTransaction, event: &str) -> Result<(), JournalError> {
        let signatures = to_json(&tx.signatures)?;
        let validators_used = to_json(&tx.validators_used)?;
        let recovery_attempts = to_json(&tx.recovery_attempts)?;

        let mut db_tx = self.pool.begin().await?;

        // Amounts are bound as text and cast to NUMERIC
        sqlx::query(
            r#"
            INSERT INTO bridge_transactions (id, direction, amount, fee, net_amount,
                from_address, to_address, status, source_tx_hash, dest_tx_hash, refund_tx_hash,
                signatures, validators_used, created_at, completed_at, last_retry_at,
                retry_count, max_retries, timeout_minutes, stuck_detection_time, alert_sent,
                recovery_attempts, admin_override, admin_notes, error, updated_at)
            VALUES ($1, $2, $3::NUMERIC, $4::NUMERIC, $5::NUMERIC, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, NOW())
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                source_tx_hash = EXCLUDED.source_tx_hash,
                dest_tx_hash = EXCLUDED.dest_tx_hash,
                refund_tx_hash = EXCLUDED.refund_tx_hash,
                signatures = EXCLUDED.signatures,
                validators_used = EXCLUDED.validators_used,
                completed_at = EXCLUDED.completed_at,
                last_retry_at = EXCLUDED.last_retry_at,
                retry_count = EXCLUDED.retry_count,
                stuck_detection_time = EXCLUDED.stuck_detection_time,
                alert_sent = EXCLUDED.alert_sent,
                recovery_attempts = EXCLUDED.recovery_attempts,
                admin_override = EXCLUDED.admin_override,
                admin_notes = EXCLUDED.admin_notes,
                error = EXCLUDED.error,
                updated_at = NOW()
            "#,
        )
        .bind(&tx.id)
        .bind(tx.direction)
        .bind(tx.amount.to_string())
        .bind(tx.fee.to_string())
        .bind(tx.net_amount.to_string())
        .bind(&tx.from_address)
        .bind(&tx.to_address)
        .bind(tx.status)
        .bind(&tx.source_tx_hash)
        .bind(&tx.dest_tx_hash)
        .bind(&tx.refund_tx_hash)
        .bind(&signatures)
        .bind(&validators_used)
        .bind(tx.created_at)
        .bind(tx.completed_at)
        .bind(tx.last_retry_at)
        .bind(tx.retry_count as i32)
        .bind(tx.max_retries as i32)
        .bind(tx.timeout_minutes)
        .bind(tx.stuck_detection_time)
        .bind(tx.alert_sent)
        .bind(&recovery_attempts)
        .bind(tx.admin_override)
        .bind(&tx.admin_notes)
        .bind(&tx.error)
        .execute(&mut *db_tx)
        .await
        .map_err(|e| {
            error!(tx_id = %tx.id, "SQL error upserting bridge transaction: {:?}", e);
            e
        })?;

        sqlx::query(
            r#"
            INSERT INTO bridge_transaction_events (transaction_id, event, status, retry_count, error)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&tx.id)
        .bind(event)
        .bind(tx.status)
        .bind(tx.retry_count as i32)
        .bind(&tx.error)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(())
    }

    async fn load_open(&self) -> Result<Vec<BridgeTransaction>, JournalError> {
        // Cast amounts to TEXT since sqlx decodes NUMERIC as BigDecimal only
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"SELECT id, direction, amount::TEXT AS amount, fee::TEXT AS fee,
                      net_amount::TEXT AS net_amount, from_address, to_address, status,
                      source_tx_hash, dest_tx_hash, refund_tx_hash, signatures, validators_used,
                      created_at, completed_at, last_retry_at, retry_count, max_retries,
                      timeout_minutes, stuck_detection_time, alert_sent, recovery_attempts,
                      admin_override, admin_notes, error
               FROM bridge_transactions
               WHERE status NOT IN ('minted', 'released', 'failed', 'cancelled')
               ORDER BY created_at"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("SQL error loading open bridge transactions: {:?}", e);
            e
        })?;

        rows.into_iter().map(BridgeTransaction::try_from).collect()
    }
}
