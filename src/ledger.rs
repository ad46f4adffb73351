//! Durable transfer ledger backed by SQLite.
//!
//! Records are keyed by transfer id and, once a burn confirms, by the burn
//! transaction hash; both lookups resolve to the same row. All mutation goes
//! through [`Ledger::save`] or [`Ledger::update_by_burn_hash`], each of which
//! refreshes `updated_at` inside a transaction so a live session and a
//! recovery sweep never interleave a read-modify-write on the same key.
//!
//! Capacity policy: the store holds at most [`MAX_STORED_TRANSFERS`] rows
//! globally; after every save the oldest rows beyond the cap are dropped.
//! [`Ledger::cleanup`] additionally purges completed transfers older than
//! seven days.

use std::str::FromStr;

use alloy::primitives::{Address, TxHash, U256};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::chain::ChainId;
use crate::error::LedgerError;
use crate::transfer::{Attestation, TransferId, TransferRecord, TransferStatus};

/// Global soft cap protecting the storage medium; not a per-owner quota.
pub const MAX_STORED_TRANSFERS: i64 = 50;

/// Completed records older than this are purged by [`Ledger::cleanup`].
pub const COMPLETED_RETENTION_DAYS: i64 = 7;

/// Partial update applied through [`Ledger::update_by_burn_hash`].
///
/// `None` fields are left untouched. Setting a non-error status without an
/// accompanying error message clears any stored error, mirroring the rule
/// that a successful transition wipes the last failure.
#[derive(Debug, Clone, Default)]
pub struct TransferPatch {
    pub status: Option<TransferStatus>,
    pub burn_tx_hash: Option<TxHash>,
    pub mint_tx_hash: Option<TxHash>,
    pub attestation: Option<Attestation>,
    pub error: Option<String>,
}

impl TransferPatch {
    pub fn status(status: TransferStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_attestation(mut self, attestation: Attestation) -> Self {
        self.attestation = Some(attestation);
        self
    }

    pub fn with_mint_tx(mut self, mint_tx_hash: TxHash) -> Self {
        self.mint_tx_hash = Some(mint_tx_hash);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TransferRow {
    id: String,
    owner_address: String,
    source_chain: i64,
    destination_chain: i64,
    amount: String,
    destination_address: String,
    burn_tx_hash: Option<String>,
    mint_tx_hash: Option<String>,
    status: String,
    error: Option<String>,
    attestation: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransferRow> for TransferRecord {
    type Error = LedgerError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        let attestation = row
            .attestation
            .as_deref()
            .map(serde_json::from_str::<Attestation>)
            .transpose()?;

        Ok(Self {
            id: TransferId::from_str(&row.id)?,
            owner_address: Address::from_str(&row.owner_address)?,
            source_chain: ChainId(u64::try_from(row.source_chain).unwrap_or_default()),
            destination_chain: ChainId(u64::try_from(row.destination_chain).unwrap_or_default()),
            amount: U256::from_str_radix(&row.amount, 10).map_err(LedgerError::InvalidAmount)?,
            destination_address: Address::from_str(&row.destination_address)?,
            burn_tx_hash: row
                .burn_tx_hash
                .as_deref()
                .map(TxHash::from_str)
                .transpose()?,
            mint_tx_hash: row
                .mint_tx_hash
                .as_deref()
                .map(TxHash::from_str)
                .transpose()?,
            status: row.status.parse()?,
            error: row.error,
            attestation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, owner_address, source_chain, destination_chain, \
     amount, destination_address, burn_tx_hash, mint_tx_hash, status, error, attestation, \
     created_at, updated_at FROM transfers";

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Collision-resistant opaque transfer id.
    pub fn generate_id() -> TransferId {
        TransferId::generate()
    }

    /// Inserts or updates the record by id, refreshing `updated_at`, then
    /// enforces the global record cap.
    pub async fn save(&self, record: &TransferRecord) -> Result<(), LedgerError> {
        let attestation_json = record
            .attestation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO transfers (id, owner_address, source_chain, destination_chain, \
             amount, destination_address, burn_tx_hash, mint_tx_hash, status, error, \
             attestation, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
             ON CONFLICT(id) DO UPDATE SET \
             owner_address = excluded.owner_address, \
             source_chain = excluded.source_chain, \
             destination_chain = excluded.destination_chain, \
             amount = excluded.amount, \
             destination_address = excluded.destination_address, \
             burn_tx_hash = excluded.burn_tx_hash, \
             mint_tx_hash = excluded.mint_tx_hash, \
             status = excluded.status, \
             error = excluded.error, \
             attestation = excluded.attestation, \
             updated_at = excluded.updated_at",
        )
        .bind(record.id.to_string())
        .bind(record.owner_address.to_string())
        .bind(i64::try_from(record.source_chain.0).unwrap_or_default())
        .bind(i64::try_from(record.destination_chain.0).unwrap_or_default())
        .bind(record.amount.to_string())
        .bind(record.destination_address.to_string())
        .bind(record.burn_tx_hash.map(|hash| hash.to_string()))
        .bind(record.mint_tx_hash.map(|hash| hash.to_string()))
        .bind(record.status.as_str())
        .bind(record.error.as_deref())
        .bind(attestation_json)
        .bind(record.created_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(LedgerError::Database)?;

        self.enforce_cap().await
    }

    pub async fn get_by_id(&self, id: &TransferId) -> Result<Option<TransferRecord>, LedgerError> {
        let row: Option<TransferRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(LedgerError::Database)?;

        row.map(TransferRecord::try_from).transpose()
    }

    pub async fn get_by_burn_hash(
        &self,
        burn_tx_hash: TxHash,
    ) -> Result<Option<TransferRecord>, LedgerError> {
        let row: Option<TransferRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE burn_tx_hash = ?1"))
                .bind(burn_tx_hash.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(LedgerError::Database)?;

        row.map(TransferRecord::try_from).transpose()
    }

    /// Read-modify-write keyed by the stable burn hash. Returns the record
    /// after the update, or `None` when no record carries that hash.
    ///
    /// Completed records are never modified: a concurrent recovery sweep must
    /// not regress a finished transfer, so a patch against a completed record
    /// is skipped with a warning and the stored record returned unchanged.
    pub async fn update_by_burn_hash(
        &self,
        burn_tx_hash: TxHash,
        patch: TransferPatch,
    ) -> Result<Option<TransferRecord>, LedgerError> {
        self.update_with_ceiling(burn_tx_hash, patch, None).await
    }

    /// Forward-only variant for background writers: the patch is also skipped
    /// when the stored record has advanced past `ceiling` on the happy path.
    /// The comparison happens inside the update transaction, so a live
    /// session advancing the record concurrently can never be regressed.
    pub async fn update_by_burn_hash_at_most(
        &self,
        burn_tx_hash: TxHash,
        ceiling: TransferStatus,
        patch: TransferPatch,
    ) -> Result<Option<TransferRecord>, LedgerError> {
        self.update_with_ceiling(burn_tx_hash, patch, Some(ceiling))
            .await
    }

    async fn update_with_ceiling(
        &self,
        burn_tx_hash: TxHash,
        patch: TransferPatch,
        ceiling: Option<TransferStatus>,
    ) -> Result<Option<TransferRecord>, LedgerError> {
        let mut sql_tx = self.pool.begin().await.map_err(LedgerError::Database)?;

        let row: Option<TransferRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE burn_tx_hash = ?1"))
                .bind(burn_tx_hash.to_string())
                .fetch_optional(sql_tx.as_mut())
                .await
                .map_err(LedgerError::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record = TransferRecord::try_from(row)?;

        if record.status.is_terminal() {
            warn!(
                %burn_tx_hash,
                attempted_status = ?patch.status,
                "Skipping update of completed transfer"
            );
            return Ok(Some(record));
        }
        if let Some(ceiling) = ceiling {
            if record.status.rank() > ceiling.rank() {
                debug!(
                    %burn_tx_hash,
                    status = %record.status,
                    ceiling = %ceiling,
                    "Record advanced past ceiling, skipping update"
                );
                return Ok(Some(record));
            }
        }

        apply_patch(&mut record, patch);
        record.updated_at = Utc::now();

        let attestation_json = record
            .attestation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "UPDATE transfers SET burn_tx_hash = ?1, mint_tx_hash = ?2, status = ?3, \
             error = ?4, attestation = ?5, updated_at = ?6 WHERE id = ?7",
        )
        .bind(record.burn_tx_hash.map(|hash| hash.to_string()))
        .bind(record.mint_tx_hash.map(|hash| hash.to_string()))
        .bind(record.status.as_str())
        .bind(record.error.as_deref())
        .bind(attestation_json)
        .bind(record.updated_at)
        .bind(record.id.to_string())
        .execute(sql_tx.as_mut())
        .await
        .map_err(LedgerError::Database)?;

        sql_tx.commit().await.map_err(LedgerError::Database)?;

        debug!(%burn_tx_hash, status = %record.status, "Transfer updated");
        Ok(Some(record))
    }

    /// All transfers owned by `owner`, newest first. The address compare is
    /// case-insensitive because stored addresses are checksummed.
    pub async fn list_by_owner(
        &self,
        owner: Address,
    ) -> Result<Vec<TransferRecord>, LedgerError> {
        let rows: Vec<TransferRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE LOWER(owner_address) = LOWER(?1) ORDER BY created_at DESC"
        ))
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::Database)?;

        rows.into_iter().map(TransferRecord::try_from).collect()
    }

    /// Removes a record by id; returns whether a row was deleted.
    pub async fn remove(&self, id: &TransferId) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM transfers WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(LedgerError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Purges completed transfers older than the retention window. Returns
    /// the number of purged rows.
    pub async fn cleanup(&self) -> Result<u64, LedgerError> {
        let cutoff = Utc::now() - Duration::days(COMPLETED_RETENTION_DAYS);

        let result =
            sqlx::query("DELETE FROM transfers WHERE status = 'completed' AND updated_at < ?1")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(LedgerError::Database)?;

        if result.rows_affected() > 0 {
            debug!(purged = result.rows_affected(), "Cleaned up old transfers");
        }
        Ok(result.rows_affected())
    }

    async fn enforce_cap(&self) -> Result<(), LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers")
            .fetch_one(&self.pool)
            .await
            .map_err(LedgerError::Database)?;

        let excess = count - MAX_STORED_TRANSFERS;
        if excess <= 0 {
            return Ok(());
        }

        let result = sqlx::query(
            "DELETE FROM transfers WHERE id IN \
             (SELECT id FROM transfers ORDER BY created_at ASC LIMIT ?1)",
        )
        .bind(excess)
        .execute(&self.pool)
        .await
        .map_err(LedgerError::Database)?;

        warn!(
            evicted = result.rows_affected(),
            cap = MAX_STORED_TRANSFERS,
            "Ledger over capacity, evicted oldest transfers"
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn apply_patch(record: &mut TransferRecord, patch: TransferPatch) {
    if let Some(burn_tx_hash) = patch.burn_tx_hash {
        record.burn_tx_hash = Some(burn_tx_hash);
    }
    if let Some(mint_tx_hash) = patch.mint_tx_hash {
        record.mint_tx_hash = Some(mint_tx_hash);
    }
    if let Some(attestation) = patch.attestation {
        record.attestation = Some(attestation);
    }

    match (patch.status, patch.error) {
        (Some(status), Some(error)) => {
            record.status = status;
            record.error = Some(error);
        }
        (Some(status), None) => {
            record.status = status;
            // A successful transition wipes the last failure.
            if status != TransferStatus::Error {
                record.error = None;
            }
        }
        (None, Some(error)) => record.error = Some(error),
        (None, None) => {}
    }

    // A set mint hash forces the terminal state.
    if record.mint_tx_hash.is_some() {
        record.status = TransferStatus::Completed;
    }
}
