//! PostgreSQL exchange store.
//!
//! Production implementation of `ExchangeRepository`. Uses dynamic queries
//! (sqlx::query) instead of compile-time checked macros (sqlx::query!) to
//! allow compilation without DATABASE_URL. The status predicate on the
//! UPDATE is the per-record compare-and-swap; the partial unique index on
//! `deposit_address` enforces that no two open records share an address.

use crate::error::StoreError;
use crate::repository::ExchangeRepository;
use async_trait::async_trait;
use cambio_domain::{Amount, CurrencyCode, ExchangeId, ExchangeRecord, ExchangeStatus, RateType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS exchanges (
    id UUID PRIMARY KEY,
    from_currency TEXT NOT NULL,
    to_currency TEXT NOT NULL,
    from_amount NUMERIC NOT NULL,
    to_amount NUMERIC NOT NULL,
    actual_received_amount NUMERIC,
    rate_type TEXT NOT NULL,
    rate NUMERIC NOT NULL,
    fee_percent NUMERIC NOT NULL,
    deposit_address TEXT NOT NULL,
    receiving_address TEXT NOT NULL,
    refund_address TEXT,
    email TEXT,
    status TEXT NOT NULL,
    deposit_tx_hash TEXT,
    confirmations INTEGER NOT NULL DEFAULT 0,
    required_confirmations INTEGER NOT NULL,
    failure_reason TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)
"#;

const OPEN_ADDRESS_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS exchanges_open_deposit_address
ON exchanges (deposit_address)
WHERE status IN ('waiting', 'received', 'exchanging')
"#;

/// Create the exchanges table and indexes if they do not exist.
pub async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(SCHEMA).execute(pool).await?;
    sqlx::query(OPEN_ADDRESS_INDEX).execute(pool).await?;
    debug!("Exchange schema initialized");
    Ok(())
}

/// PostgreSQL-backed exchange repository.
pub struct PgExchangeStore {
    pool: PgPool,
}

impl PgExchangeStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool (for tests).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_row(row: &sqlx::postgres::PgRow) -> Result<ExchangeRecord, StoreError> {
    let from_currency: String = row.try_get("from_currency")?;
    let to_currency: String = row.try_get("to_currency")?;
    let rate_type: String = row.try_get("rate_type")?;
    let status: String = row.try_get("status")?;
    let from_amount: Decimal = row.try_get("from_amount")?;
    let to_amount: Decimal = row.try_get("to_amount")?;
    let confirmations: i32 = row.try_get("confirmations")?;
    let required_confirmations: i32 = row.try_get("required_confirmations")?;

    Ok(ExchangeRecord {
        id: row.try_get::<ExchangeId, _>("id")?,
        from_currency: CurrencyCode::new(&from_currency)?,
        to_currency: CurrencyCode::new(&to_currency)?,
        from_amount: Amount::new(from_amount)?,
        to_amount: Amount::new(to_amount)?,
        actual_received_amount: row.try_get("actual_received_amount")?,
        rate_type: RateType::from_str(&rate_type)?,
        rate: row.try_get("rate")?,
        fee_percent: row.try_get("fee_percent")?,
        deposit_address: row.try_get("deposit_address")?,
        receiving_address: row.try_get("receiving_address")?,
        refund_address: row.try_get("refund_address")?,
        email: row.try_get("email")?,
        status: ExchangeStatus::from_str(&status)?,
        deposit_tx_hash: row.try_get("deposit_tx_hash")?,
        confirmations: u32::try_from(confirmations).unwrap_or(0),
        required_confirmations: u32::try_from(required_confirmations).unwrap_or(0),
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl ExchangeRepository for PgExchangeStore {
    async fn insert(&self, record: &ExchangeRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO exchanges (
                id, from_currency, to_currency, from_amount, to_amount,
                actual_received_amount, rate_type, rate, fee_percent,
                deposit_address, receiving_address, refund_address, email,
                status, deposit_tx_hash, confirmations, required_confirmations,
                failure_reason, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9,
                $10, $11, $12, $13,
                $14, $15, $16, $17,
                $18, $19, $20
            )
            "#,
        )
        .bind(record.id)
        .bind(record.from_currency.as_str())
        .bind(record.to_currency.as_str())
        .bind(record.from_amount.as_decimal())
        .bind(record.to_amount.as_decimal())
        .bind(record.actual_received_amount)
        .bind(record.rate_type.to_string())
        .bind(record.rate)
        .bind(record.fee_percent)
        .bind(&record.deposit_address)
        .bind(&record.receiving_address)
        .bind(&record.refund_address)
        .bind(&record.email)
        .bind(record.status.name())
        .bind(&record.deposit_tx_hash)
        .bind(record.confirmations as i32)
        .bind(record.required_confirmations as i32)
        .bind(&record.failure_reason)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: ExchangeId) -> Result<Option<ExchangeRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM exchanges WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| parse_row(&r)).transpose()
    }

    async fn update_guarded(
        &self,
        expected: ExchangeStatus,
        record: &ExchangeRecord,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE exchanges SET
                actual_received_amount = $3,
                status = $4,
                deposit_tx_hash = $5,
                confirmations = $6,
                failure_reason = $7,
                updated_at = $8
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(record.id)
        .bind(expected.name())
        .bind(record.actual_received_amount)
        .bind(record.status.name())
        .bind(&record.deposit_tx_hash)
        .bind(record.confirmations as i32)
        .bind(&record.failure_reason)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a lost race from a missing record
            let current = sqlx::query("SELECT status FROM exchanges WHERE id = $1")
                .bind(record.id)
                .fetch_optional(&self.pool)
                .await?;

            return match current {
                Some(row) => {
                    let status: String = row.try_get("status")?;
                    Err(StoreError::Conflict {
                        id: record.id.to_string(),
                        expected,
                        actual: ExchangeStatus::from_str(&status)?,
                    })
                }
                None => Err(StoreError::not_found("exchange", record.id.to_string())),
            };
        }

        Ok(())
    }

    async fn find_open(&self) -> Result<Vec<ExchangeRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM exchanges WHERE status IN ('waiting', 'received', 'exchanging')",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_row).collect()
    }

    async fn find_open_by_deposit_address(
        &self,
        address: &str,
    ) -> Result<Option<ExchangeRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM exchanges
            WHERE deposit_address = $1
              AND status IN ('waiting', 'received', 'exchanging')
            LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| parse_row(&r)).transpose()
    }
}
