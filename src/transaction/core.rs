//! Defines the core data model and database queries for synced transactions.

use rusqlite::{Connection, Row};
use time::OffsetDateTime;

use crate::{Error, money::Money};

// ============================================================================
// MODELS
// ============================================================================

/// A transaction fetched from an external aggregator and persisted locally.
///
/// Records are immutable once stored: re-ingestion of a known
/// `(external_account_id, transaction_id)` pair is a no-op, never an update.
/// Pending to posted transitions are not reconciled by id; drift is corrected
/// by the balance delta instead.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedTransaction {
    /// The external account the transaction belongs to.
    pub external_account_id: String,
    /// Provider-issued identity, unique within the account.
    pub transaction_id: String,
    /// The transaction amount as an unsigned magnitude. Debit vs credit is a
    /// presentation concern, not a stored fact.
    pub amount: Money,
    /// When the transaction occurred. None when the provider only supplied a
    /// pending marker.
    pub occurred_at: Option<OffsetDateTime>,
    /// A text description of the transaction, if the provider supplied one.
    pub description: Option<String>,
    /// The merchant name, if the provider supplied one.
    pub merchant: Option<String>,
    /// Whether the provider has not yet posted/settled the transaction.
    pub is_pending: bool,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the synced transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_synced_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS synced_transaction (
                external_account_id TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                amount REAL NOT NULL,
                occurred_at TEXT,
                description TEXT,
                merchant TEXT,
                is_pending INTEGER NOT NULL,
                PRIMARY KEY (external_account_id, transaction_id)
                )",
        (),
    )?;

    Ok(())
}

/// Map a database row to a [SyncedTransaction].
pub fn map_synced_transaction_row(row: &Row) -> Result<SyncedTransaction, rusqlite::Error> {
    let external_account_id = row.get(0)?;
    let transaction_id = row.get(1)?;
    let amount: f64 = row.get(2)?;
    let occurred_at = row.get(3)?;
    let description = row.get(4)?;
    let merchant = row.get(5)?;
    let is_pending = row.get(6)?;

    Ok(SyncedTransaction {
        external_account_id,
        transaction_id,
        amount: Money::from_dollars(amount),
        occurred_at,
        description,
        merchant,
        is_pending,
    })
}

/// Insert a transaction unless its `(account, transaction_id)` key is already
/// present.
///
/// Returns whether the row was newly inserted. Replaying a known transaction
/// is a no-op, which makes ingestion idempotent and safe to retry after a
/// partial sync.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn insert_if_absent(
    transaction: &SyncedTransaction,
    connection: &Connection,
) -> Result<bool, Error> {
    let rows_changed = connection.execute(
        "INSERT INTO synced_transaction
            (external_account_id, transaction_id, amount, occurred_at, description,
             merchant, is_pending)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (external_account_id, transaction_id) DO NOTHING",
        (
            &transaction.external_account_id,
            &transaction.transaction_id,
            transaction.amount.abs().as_dollars(),
            &transaction.occurred_at,
            &transaction.description,
            &transaction.merchant,
            transaction.is_pending,
        ),
    )?;

    Ok(rows_changed == 1)
}

/// Retrieve all synced transactions for one external account, newest first.
///
/// Rows without a timestamp (pending markers) sort last.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn list_transactions_for_account(
    external_account_id: &str,
    connection: &Connection,
) -> Result<Vec<SyncedTransaction>, Error> {
    connection
        .prepare(
            "SELECT external_account_id, transaction_id, amount, occurred_at, description,
                    merchant, is_pending
             FROM synced_transaction
             WHERE external_account_id = :id
             ORDER BY occurred_at IS NULL, occurred_at DESC",
        )?
        .query_map(&[(":id", external_account_id)], map_synced_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Retrieve all synced transactions across every linked account, newest first.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn list_all_transactions(connection: &Connection) -> Result<Vec<SyncedTransaction>, Error> {
    connection
        .prepare(
            "SELECT external_account_id, transaction_id, amount, occurred_at, description,
                    merchant, is_pending
             FROM synced_transaction
             ORDER BY occurred_at IS NULL, occurred_at DESC",
        )?
        .query_map([], map_synced_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Delete every synced transaction belonging to one external account.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn delete_transactions_for_account(
    external_account_id: &str,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "DELETE FROM synced_transaction WHERE external_account_id = ?1",
        (external_account_id,),
    )?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
