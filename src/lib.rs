//! Pocketsync keeps an internal "tracking pocket" sub-account in agreement
//! with an external credit-card style balance.
//!
//! The library polls external account aggregators, deduplicates their
//! transaction feeds into a local SQLite store, and issues internal transfers
//! so that each tracking pocket mirrors the balance of the external account it
//! is linked to. The daemon binary wires the engine to the real banking
//! GraphQL endpoint and aggregator REST APIs and runs the background
//! scheduler.

#![warn(missing_docs)]

mod cache;
mod db;
mod ledger;
mod link;
mod money;
mod provider;
mod sync;
mod transaction;

pub use cache::{CacheInvalidator, LoggingCacheInvalidator};
pub use db::initialize as initialize_db;
pub use ledger::{CrewLedgerClient, LedgerClient, Subaccount};
pub use link::{LinkedAccount, Provider, store_credential};
pub use money::Money;
pub use provider::{BankClient, FetchedTransaction, MerchantClient, ProviderAdapter, SyncWindow};
pub use sync::{EngineConfig, ReconcilingTransfer, Scheduler, SyncEngine, SyncOutcome};
pub use transaction::SyncedTransaction;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A provider request failed for a transient reason, e.g. a network error
    /// or a non-2xx response that does not signal credential revocation.
    ///
    /// No state is mutated; the account is retried on the next scheduler tick.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider signalled that the access credential is no longer valid.
    ///
    /// The caller marks the credential invalid in the link registry so that
    /// dependent accounts are skipped until the credential is replaced.
    #[error("the provider credential has been revoked")]
    CredentialRevoked,

    /// The external account is already registered, or a tracking pocket is
    /// already attached to it.
    ///
    /// A pocket is attached exactly once and never silently recreated.
    #[error("the account is already linked to a tracking pocket")]
    AlreadyLinked,

    /// An internal ledger operation (balance read, transfer, pocket
    /// management) failed.
    ///
    /// Transaction ingestion that happened before the failure stays committed;
    /// the next tick recomputes the same delta and retries the transfer.
    #[error("internal ledger operation failed: {0}")]
    LedgerError(String),

    /// The requested link, pocket, or subaccount could not be found.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLock,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 1555 occurs when a PRIMARY KEY constraint failed, 2067 when
            // any other UNIQUE constraint failed. Both only fire on the link
            // table's keys; the idempotent transaction insert uses ON CONFLICT.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if (sql_error.extended_code == 1555 || sql_error.extended_code == 2067)
                    && desc.contains("linked_account") =>
            {
                Error::AlreadyLinked
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}
