//! SQLite-backed [`CreditStore`].
//!
//! Durable storage for the borrower registry, the payout replay set, and
//! bounded payout history, using connection pooling via `r2d2` the same
//! way this codebase's other SQLite-backed store does. `u128` fields
//! (`credit_limit`, `current_debt`, `interest_owed`) are stored as
//! decimal `TEXT`, since SQLite integers are 64-bit; `payout_history` is
//! stored as a JSON array, since its length is bounded by
//! `MAX_PAYOUT_RECORDS` and it is always read and written as a whole.

use std::path::Path;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use super::traits::{CreditStore, StorageError, StorageResult};
use crate::credit_manager::{BorrowerRecord, BorrowerStatus, PayoutRecord};

pub struct SqliteCreditStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteCreditStore {
    /// Create a new store with the given database path, creating the
    /// file and running migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS borrowers (
                borrower TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                btc_payout_key_hash TEXT NOT NULL,
                total_revenue_sats INTEGER NOT NULL,
                trailing_revenue_sats INTEGER NOT NULL,
                credit_limit TEXT NOT NULL,
                current_debt TEXT NOT NULL,
                interest_owed TEXT NOT NULL,
                last_debt_update_timestamp INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                payout_count INTEGER NOT NULL,
                payout_history TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processed_payouts (
                txid TEXT NOT NULL,
                vout INTEGER NOT NULL,
                PRIMARY KEY (txid, vout)
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<BorrowerRecord> {
        let status_str: String = row.get("status")?;
        let status = match status_str.as_str() {
            "frozen" => BorrowerStatus::Frozen,
            _ => BorrowerStatus::Active,
        };
        let btc_payout_key_hash_hex: String = row.get("btc_payout_key_hash")?;
        let btc_payout_key_hash = decode_hash32(&btc_payout_key_hash_hex);

        let credit_limit_str: String = row.get("credit_limit")?;
        let current_debt_str: String = row.get("current_debt")?;
        let interest_owed_str: String = row.get("interest_owed")?;
        let history_json: String = row.get("payout_history")?;
        let payout_history: Vec<PayoutRecord> =
            serde_json::from_str(&history_json).unwrap_or_default();

        Ok(BorrowerRecord {
            status,
            btc_payout_key_hash,
            total_revenue_sats: row.get::<_, i64>("total_revenue_sats")? as u64,
            trailing_revenue_sats: row.get::<_, i64>("trailing_revenue_sats")? as u64,
            credit_limit: credit_limit_str.parse().unwrap_or(0),
            current_debt: current_debt_str.parse().unwrap_or(0),
            interest_owed: interest_owed_str.parse().unwrap_or(0),
            last_debt_update_timestamp: row.get::<_, i64>("last_debt_update_timestamp")? as u64,
            created_at: row.get::<_, i64>("created_at")? as u64,
            payout_count: row.get::<_, i64>("payout_count")? as u64,
            payout_history: payout_history.into(),
        })
    }

    fn insert_record(
        conn: &rusqlite::Connection,
        borrower: [u8; 20],
        record: &BorrowerRecord,
    ) -> Result<(), StorageError> {
        conn.execute(
            r#"
            INSERT INTO borrowers (
                borrower, status, btc_payout_key_hash, total_revenue_sats,
                trailing_revenue_sats, credit_limit, current_debt, interest_owed,
                last_debt_update_timestamp, created_at, payout_count, payout_history
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                hex::encode(borrower),
                status_str(record.status),
                hex::encode(record.btc_payout_key_hash),
                record.total_revenue_sats as i64,
                record.trailing_revenue_sats as i64,
                record.credit_limit.to_string(),
                record.current_debt.to_string(),
                record.interest_owed.to_string(),
                record.last_debt_update_timestamp as i64,
                record.created_at as i64,
                record.payout_count as i64,
                serde_json::to_string(&Vec::from(record.payout_history.clone()))
                    .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(hex::encode(borrower));
                }
            }
            StorageError::Database(e.to_string())
        })?;
        Ok(())
    }

    fn update_record(
        conn: &rusqlite::Connection,
        borrower: [u8; 20],
        record: &BorrowerRecord,
    ) -> Result<(), StorageError> {
        let rows_affected = conn
            .execute(
                r#"
                UPDATE borrowers SET
                    status = ?2,
                    btc_payout_key_hash = ?3,
                    total_revenue_sats = ?4,
                    trailing_revenue_sats = ?5,
                    credit_limit = ?6,
                    current_debt = ?7,
                    interest_owed = ?8,
                    last_debt_update_timestamp = ?9,
                    created_at = ?10,
                    payout_count = ?11,
                    payout_history = ?12
                WHERE borrower = ?1
                "#,
                params![
                    hex::encode(borrower),
                    status_str(record.status),
                    hex::encode(record.btc_payout_key_hash),
                    record.total_revenue_sats as i64,
                    record.trailing_revenue_sats as i64,
                    record.credit_limit.to_string(),
                    record.current_debt.to_string(),
                    record.interest_owed.to_string(),
                    record.last_debt_update_timestamp as i64,
                    record.created_at as i64,
                    record.payout_count as i64,
                    serde_json::to_string(&Vec::from(record.payout_history.clone()))
                        .map_err(|e| StorageError::InvalidData(e.to_string()))?,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(hex::encode(borrower)));
        }
        Ok(())
    }
}

fn status_str(status: BorrowerStatus) -> &'static str {
    match status {
        BorrowerStatus::Active => "active",
        BorrowerStatus::Frozen => "frozen",
    }
}

fn decode_hash32(hex_str: &str) -> [u8; 32] {
    let bytes = hex::decode(hex_str).unwrap_or_default();
    let mut out = [0u8; 32];
    let len = bytes.len().min(32);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

#[async_trait]
impl CreditStore for SqliteCreditStore {
    async fn register_borrower(
        &self,
        borrower: [u8; 20],
        record: BorrowerRecord,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        Self::insert_record(&conn, borrower, &record)
    }

    async fn get_borrower(&self, borrower: &[u8; 20]) -> StorageResult<Option<BorrowerRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM borrowers WHERE borrower = ?1",
            params![hex::encode(borrower)],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    async fn update_borrower(
        &self,
        borrower: [u8; 20],
        record: BorrowerRecord,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        Self::update_record(&conn, borrower, &record)
    }

    async fn is_processed(&self, txid: [u8; 32], vout: u32) -> StorageResult<bool> {
        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_payouts WHERE txid = ?1 AND vout = ?2",
                params![hex::encode(txid), vout],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(exists.is_some())
    }

    async fn apply_payout(
        &self,
        borrower: [u8; 20],
        txid: [u8; 32],
        vout: u32,
        record: BorrowerRecord,
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        tx.execute(
            "INSERT OR IGNORE INTO processed_payouts (txid, vout) VALUES (?1, ?2)",
            params![hex::encode(txid), vout],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Self::update_record(&tx, borrower, &record)?;

        tx.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }
}
