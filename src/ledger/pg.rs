//! Postgres-backed ledger.
//!
//! Amounts are stored as NUMERIC(78,0) and moved as text to avoid
//! BigDecimal conversions; enums are stored as lowercase VARCHAR. The
//! idempotent insert and the CAS transition are expressed directly in SQL
//! so concurrent writers cannot interleave between read and write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;

use crate::fees::VolumeWindow;
use crate::types::{BridgeState, ChainId, Direction, FeeAsset};

use super::models::{BridgeRecord, NewBridgeRecord, TransitionPatch};
use super::{InsertOutcome, Ledger, LedgerError};

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

/// SQL SELECT columns for bridge_records (casting NUMERIC to TEXT)
const RECORD_SELECT: &str = r#"id, direction, source_chain, source_tx_hash, log_index,
    amount::TEXT as amount, source_address, destination_address, destination_tx_hash, state,
    required_confirmations, observed_confirmations, source_block_height,
    fee_amount::TEXT as fee_amount, fee_asset, fee_bps,
    volume_at_fee_usd::TEXT as volume_at_fee_usd, failure_reason, retry_count,
    created_at, updated_at"#;

#[derive(Debug, FromRow)]
struct RecordRow {
    id: String,
    direction: String,
    source_chain: String,
    source_tx_hash: String,
    log_index: i32,
    amount: String,
    source_address: String,
    destination_address: Option<String>,
    destination_tx_hash: Option<String>,
    state: String,
    required_confirmations: i32,
    observed_confirmations: i32,
    source_block_height: i64,
    fee_amount: Option<String>,
    fee_asset: String,
    fee_bps: Option<i32>,
    volume_at_fee_usd: Option<String>,
    failure_reason: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(id: &str, reason: impl Into<String>) -> LedgerError {
    LedgerError::CorruptRow {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn parse_amount(id: &str, field: &str, value: &str) -> Result<u128, LedgerError> {
    value
        .parse()
        .map_err(|_| corrupt(id, format!("{} is not a u128: {}", field, value)))
}

impl RecordRow {
    fn into_record(self) -> Result<BridgeRecord, LedgerError> {
        let direction = Direction::parse(&self.direction)
            .ok_or_else(|| corrupt(&self.id, format!("unknown direction {}", self.direction)))?;
        let source_chain = ChainId::parse(&self.source_chain)
            .ok_or_else(|| corrupt(&self.id, format!("unknown chain {}", self.source_chain)))?;
        let state = BridgeState::parse(&self.state)
            .ok_or_else(|| corrupt(&self.id, format!("unknown state {}", self.state)))?;
        let fee_asset = FeeAsset::parse(&self.fee_asset)
            .ok_or_else(|| corrupt(&self.id, format!("unknown fee asset {}", self.fee_asset)))?;
        let amount = parse_amount(&self.id, "amount", &self.amount)?;
        let fee_amount = match &self.fee_amount {
            Some(v) => Some(parse_amount(&self.id, "fee_amount", v)?),
            None => None,
        };
        let volume_at_fee_usd = match &self.volume_at_fee_usd {
            Some(v) => Some(parse_amount(&self.id, "volume_at_fee_usd", v)?),
            None => None,
        };

        Ok(BridgeRecord {
            id: self.id,
            direction,
            source_chain,
            source_tx_hash: self.source_tx_hash,
            log_index: self.log_index as u32,
            amount,
            source_address: self.source_address,
            destination_address: self.destination_address,
            destination_tx_hash: self.destination_tx_hash,
            state,
            required_confirmations: self.required_confirmations as u32,
            observed_confirmations: self.observed_confirmations as u32,
            source_block_height: self.source_block_height as u64,
            fee_amount,
            fee_asset,
            fee_bps: self.fee_bps.map(|b| b as u16),
            volume_at_fee_usd,
            failure_reason: self.failure_reason,
            retry_count: self.retry_count as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn rows_to_records(rows: Vec<RecordRow>) -> Result<Vec<BridgeRecord>, LedgerError> {
    rows.into_iter().map(RecordRow::into_record).collect()
}

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn insert(&self, new: &NewBridgeRecord) -> Result<InsertOutcome, LedgerError> {
        let query = format!(
            r#"
            INSERT INTO bridge_records (id, direction, source_chain, source_tx_hash, log_index,
                amount, source_address, destination_address, state, required_confirmations,
                source_block_height, fee_asset, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7, $8, 'detected', $9, $10, $11, $12)
            ON CONFLICT (source_chain, source_tx_hash, log_index) DO NOTHING
            RETURNING {}
            "#,
            RECORD_SELECT
        );
        let row = sqlx::query_as::<_, RecordRow>(&query)
            .bind(&new.id)
            .bind(new.direction.as_str())
            .bind(new.source_chain.as_str())
            .bind(&new.source_tx_hash)
            .bind(new.log_index as i32)
            .bind(new.amount.to_string())
            .bind(&new.source_address)
            .bind(&new.destination_address)
            .bind(new.required_confirmations as i32)
            .bind(new.source_block_height as i64)
            .bind(new.fee_asset.as_str())
            .bind(&new.failure_reason)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(InsertOutcome::Inserted(row.into_record()?)),
            None => Ok(InsertOutcome::Duplicate),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<BridgeRecord>, LedgerError> {
        let query = format!("SELECT {} FROM bridge_records WHERE id = $1", RECORD_SELECT);
        let row = sqlx::query_as::<_, RecordRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RecordRow::into_record).transpose()
    }

    async fn by_source_address(&self, address: &str) -> Result<Vec<BridgeRecord>, LedgerError> {
        let query = format!(
            "SELECT {} FROM bridge_records WHERE source_address = $1 ORDER BY created_at ASC",
            RECORD_SELECT
        );
        let rows = sqlx::query_as::<_, RecordRow>(&query)
            .bind(address)
            .fetch_all(&self.pool)
            .await?;
        rows_to_records(rows)
    }

    async fn non_terminal(&self) -> Result<Vec<BridgeRecord>, LedgerError> {
        let query = format!(
            "SELECT {} FROM bridge_records WHERE state NOT IN ('completed', 'failed') \
             ORDER BY created_at ASC",
            RECORD_SELECT
        );
        let rows = sqlx::query_as::<_, RecordRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        rows_to_records(rows)
    }

    async fn transition(
        &self,
        id: &str,
        from: &[BridgeState],
        to: BridgeState,
        patch: TransitionPatch,
    ) -> Result<bool, LedgerError> {
        let from_states: Vec<String> = from
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.as_str().to_string())
            .collect();
        if from_states.is_empty() {
            return Ok(false);
        }

        // COALESCE keeps destination_tx_hash set-once and leaves untouched
        // fields as they were.
        let result = sqlx::query(
            r#"
            UPDATE bridge_records SET
                state = $2,
                destination_tx_hash = COALESCE(destination_tx_hash, $3),
                fee_amount = COALESCE($4::NUMERIC, fee_amount),
                fee_bps = COALESCE($5, fee_bps),
                volume_at_fee_usd = COALESCE($6::NUMERIC, volume_at_fee_usd),
                failure_reason = COALESCE($7, failure_reason),
                retry_count = COALESCE($8, retry_count),
                updated_at = NOW()
            WHERE id = $1
              AND state = ANY($9)
              AND state NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(&patch.destination_tx_hash)
        .bind(patch.fee_amount.map(|v| v.to_string()))
        .bind(patch.fee_bps.map(|v| v as i32))
        .bind(patch.volume_at_fee_usd.map(|v| v.to_string()))
        .bind(&patch.failure_reason)
        .bind(patch.retry_count.map(|v| v as i32))
        .bind(&from_states)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_confirmations(&self, id: &str, observed: u32) -> Result<(), LedgerError> {
        sqlx::query(
            r#"UPDATE bridge_records
               SET observed_confirmations = GREATEST(observed_confirmations, $2)
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(observed as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cursor(&self, chain: ChainId) -> Result<Option<u64>, LedgerError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"SELECT last_processed_height FROM chain_cursors WHERE chain = $1"#,
        )
        .bind(chain.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0 as u64))
    }

    async fn set_cursor(&self, chain: ChainId, height: u64) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO chain_cursors (chain, last_processed_height)
            VALUES ($1, $2)
            ON CONFLICT (chain) DO UPDATE SET last_processed_height = $2, updated_at = NOW()
            "#,
        )
        .bind(chain.as_str())
        .bind(height as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fee_volume(&self, now: DateTime<Utc>) -> Result<VolumeWindow, LedgerError> {
        let row: Option<(DateTime<Utc>, String)> = sqlx::query_as(
            r#"SELECT window_start, volume_usd::TEXT FROM fee_volume WHERE singleton = TRUE"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((window_start, volume)) => Ok(VolumeWindow {
                window_start,
                volume_usd: parse_amount("fee_volume", "volume_usd", &volume)?,
            }),
            None => {
                let window = VolumeWindow::new(now);
                self.store_fee_volume(&window).await?;
                Ok(window)
            }
        }
    }

    async fn store_fee_volume(&self, window: &VolumeWindow) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO fee_volume (singleton, window_start, volume_usd)
            VALUES (TRUE, $1, $2::NUMERIC)
            ON CONFLICT (singleton) DO UPDATE SET window_start = $1, volume_usd = $2::NUMERIC
            "#,
        )
        .bind(window.window_start)
        .bind(window.volume_usd.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_by_state(&self, state: BridgeState) -> Result<i64, LedgerError> {
        let row: (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM bridge_records WHERE state = $1"#)
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}
