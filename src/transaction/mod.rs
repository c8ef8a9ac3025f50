//! The durable store of previously ingested external transactions, used for
//! idempotent-ingestion dedup and transaction listing.

mod core;

pub use core::{
    SyncedTransaction, create_synced_transaction_table, delete_transactions_for_account,
    insert_if_absent, list_all_transactions, list_transactions_for_account,
};
