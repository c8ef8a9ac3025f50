//! Defines the core data model and database queries for linked accounts.

use rusqlite::{Connection, Row};
use time::Duration;

use crate::{Error, transaction::delete_transactions_for_account};

// ============================================================================
// MODELS
// ============================================================================

/// The external account aggregator a linked account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// A merchant-style aggregator that exposes a single card account and
    /// returns its full available transaction history on every fetch.
    MerchantAggregator,
    /// A bank-aggregation protocol that serves many accounts through one
    /// shared access credential and supports windowed transaction queries.
    BankAggregator,
}

impl Provider {
    /// The string stored in the `provider` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MerchantAggregator => "MERCHANT_AGGREGATOR",
            Self::BankAggregator => "BANK_AGGREGATOR",
        }
    }

    /// Parse the stored string form of a provider.
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "MERCHANT_AGGREGATOR" => Some(Self::MerchantAggregator),
            "BANK_AGGREGATOR" => Some(Self::BankAggregator),
            _ => None,
        }
    }

    /// The minimum spacing between two polls of the same account.
    ///
    /// The bank aggregator rate-limits aggressively, so accounts behind it are
    /// polled at most once an hour. The merchant aggregator has no gate beyond
    /// the scheduler's own tick period.
    pub fn min_sync_interval(self) -> Option<Duration> {
        match self {
            Self::MerchantAggregator => None,
            Self::BankAggregator => Some(Duration::hours(1)),
        }
    }
}

/// An external aggregator account paired with at most one internal tracking
/// pocket.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedAccount {
    /// Identity of the account at the aggregator, unique per provider.
    pub external_account_id: String,
    /// A human readable name for the account, e.g. "Sapphire Card".
    pub display_name: String,
    /// Which aggregator serves this account.
    pub provider: Provider,
    /// The internal sub-account this account reconciles against. Null until
    /// the tracking pocket is created; set exactly once.
    pub internal_pocket_id: Option<String>,
    /// Reference to a provider-wide access credential. Only meaningful for
    /// the bank aggregator, which uses one credential for many accounts.
    pub shared_credential_ref: Option<String>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the linked account table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_linked_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS linked_account (
                external_account_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                provider TEXT NOT NULL,
                internal_pocket_id TEXT UNIQUE,
                shared_credential_ref TEXT
                )",
        (),
    )?;

    Ok(())
}

/// Map a database row to a [LinkedAccount].
pub fn map_linked_account_row(row: &Row) -> Result<LinkedAccount, rusqlite::Error> {
    let external_account_id: String = row.get(0)?;
    let display_name = row.get(1)?;
    let raw_provider: String = row.get(2)?;
    let internal_pocket_id = row.get(3)?;
    let shared_credential_ref = row.get(4)?;

    let provider = Provider::from_str(&raw_provider).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown provider {raw_provider:?}").into(),
        )
    })?;

    Ok(LinkedAccount {
        external_account_id,
        display_name,
        provider,
        internal_pocket_id,
        shared_credential_ref,
    })
}

/// Register an external account for tracking.
///
/// The new link has no tracking pocket; call [attach_pocket] once the pocket
/// has been created on the internal ledger.
///
/// # Errors
/// This function will return a:
/// - [Error::AlreadyLinked] if the external account is already registered,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_link(
    external_account_id: &str,
    display_name: &str,
    provider: Provider,
    shared_credential_ref: Option<&str>,
    connection: &Connection,
) -> Result<LinkedAccount, Error> {
    connection.execute(
        "INSERT INTO linked_account
            (external_account_id, display_name, provider, shared_credential_ref)
         VALUES (?1, ?2, ?3, ?4)",
        (
            external_account_id,
            display_name,
            provider.as_str(),
            shared_credential_ref,
        ),
    )?;

    Ok(LinkedAccount {
        external_account_id: external_account_id.to_owned(),
        display_name: display_name.to_owned(),
        provider,
        internal_pocket_id: None,
        shared_credential_ref: shared_credential_ref.map(str::to_owned),
    })
}

/// Retrieve a linked account by its external account id.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the external account is not registered,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_link(external_account_id: &str, connection: &Connection) -> Result<LinkedAccount, Error> {
    let link = connection
        .prepare(
            "SELECT external_account_id, display_name, provider, internal_pocket_id,
                    shared_credential_ref
             FROM linked_account WHERE external_account_id = :id",
        )?
        .query_one(&[(":id", external_account_id)], map_linked_account_row)?;

    Ok(link)
}

/// Attach a freshly created tracking pocket to a linked account.
///
/// A pocket is attached exactly once. Attempting to attach a second pocket is
/// rejected so that a pocket is never silently recreated.
///
/// # Errors
/// This function will return a:
/// - [Error::AlreadyLinked] if the link already has a pocket,
/// - [Error::NotFound] if the external account is not registered,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn attach_pocket(
    external_account_id: &str,
    pocket_id: &str,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_changed = connection.execute(
        "UPDATE linked_account SET internal_pocket_id = ?1
         WHERE external_account_id = ?2 AND internal_pocket_id IS NULL",
        (pocket_id, external_account_id),
    )?;

    if rows_changed == 1 {
        return Ok(());
    }

    // Nothing changed: either the link does not exist, or a pocket is already
    // attached.
    match get_link(external_account_id, connection) {
        Ok(_) => Err(Error::AlreadyLinked),
        Err(error) => Err(error),
    }
}

/// Remove a linked account along with its synced transactions.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the external account is not registered,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn remove_link(external_account_id: &str, connection: &Connection) -> Result<(), Error> {
    let transaction = connection.unchecked_transaction()?;

    delete_transactions_for_account(external_account_id, &transaction)?;
    let rows_changed = transaction.execute(
        "DELETE FROM linked_account WHERE external_account_id = ?1",
        (external_account_id,),
    )?;

    if rows_changed == 0 {
        return Err(Error::NotFound);
    }

    transaction.commit()?;

    Ok(())
}

/// List the links the reconciliation engine should poll.
///
/// Only links with a tracking pocket and a valid (non-revoked) provider
/// credential are returned. A provider with no credential record is treated as
/// valid, which covers the merchant aggregator's per-account API key.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn list_active_links(connection: &Connection) -> Result<Vec<LinkedAccount>, Error> {
    connection
        .prepare(
            "SELECT l.external_account_id, l.display_name, l.provider, l.internal_pocket_id,
                    l.shared_credential_ref
             FROM linked_account l
             LEFT JOIN provider_credential c ON c.provider = l.provider
             WHERE l.internal_pocket_id IS NOT NULL AND COALESCE(c.is_valid, 1) = 1
             ORDER BY l.external_account_id",
        )?
        .query_map([], map_linked_account_row)?
        .map(|maybe_link| maybe_link.map_err(Error::from))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod link_registry_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        db::initialize,
        link::{invalidate_credential, store_credential},
    };

    use super::{
        Provider, attach_pocket, create_link, get_link, list_active_links, remove_link,
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn create_and_get_link() {
        let conn = get_test_connection();

        let created = create_link(
            "acc-1",
            "Sapphire Card",
            Provider::BankAggregator,
            Some("bank-item-1"),
            &conn,
        )
        .expect("Could not create link");

        let fetched = get_link("acc-1", &conn).expect("Could not get link");

        assert_eq!(created, fetched);
        assert_eq!(fetched.internal_pocket_id, None);
    }

    #[test]
    fn create_fails_on_duplicate_external_id() {
        let conn = get_test_connection();
        create_link("acc-1", "Card", Provider::MerchantAggregator, None, &conn).unwrap();

        let duplicate = create_link("acc-1", "Card", Provider::MerchantAggregator, None, &conn);

        assert_eq!(duplicate, Err(Error::AlreadyLinked));
    }

    #[test]
    fn attach_pocket_succeeds_once() {
        let conn = get_test_connection();
        create_link("acc-1", "Card", Provider::MerchantAggregator, None, &conn).unwrap();

        attach_pocket("acc-1", "pocket-1", &conn).expect("Could not attach pocket");

        let link = get_link("acc-1", &conn).unwrap();
        assert_eq!(link.internal_pocket_id, Some("pocket-1".to_owned()));
    }

    #[test]
    fn attach_pocket_fails_on_second_attach() {
        let conn = get_test_connection();
        create_link("acc-1", "Card", Provider::MerchantAggregator, None, &conn).unwrap();
        attach_pocket("acc-1", "pocket-1", &conn).unwrap();

        let result = attach_pocket("acc-1", "pocket-2", &conn);

        assert_eq!(result, Err(Error::AlreadyLinked));
    }

    #[test]
    fn attach_pocket_fails_on_unknown_link() {
        let conn = get_test_connection();

        let result = attach_pocket("nope", "pocket-1", &conn);

        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn remove_link_deletes_transactions() {
        let conn = get_test_connection();
        create_link("acc-1", "Card", Provider::MerchantAggregator, None, &conn).unwrap();
        conn.execute(
            "INSERT INTO synced_transaction
                (external_account_id, transaction_id, amount, is_pending)
             VALUES ('acc-1', 't1', 12.5, 0)",
            (),
        )
        .unwrap();

        remove_link("acc-1", &conn).expect("Could not remove link");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM synced_transaction", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(get_link("acc-1", &conn), Err(Error::NotFound));
    }

    #[test]
    fn remove_link_fails_on_unknown_link() {
        let conn = get_test_connection();

        assert_eq!(remove_link("nope", &conn), Err(Error::NotFound));
    }

    #[test]
    fn list_active_links_skips_links_without_pocket() {
        let conn = get_test_connection();
        create_link("acc-1", "Card", Provider::MerchantAggregator, None, &conn).unwrap();
        create_link("acc-2", "Other", Provider::MerchantAggregator, None, &conn).unwrap();
        attach_pocket("acc-2", "pocket-2", &conn).unwrap();

        let active = list_active_links(&conn).unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].external_account_id, "acc-2");
    }

    #[test]
    fn list_active_links_skips_revoked_credentials() {
        let conn = get_test_connection();
        store_credential(Provider::BankAggregator, "bank-item-1", &conn).unwrap();
        create_link(
            "acc-1",
            "Card",
            Provider::BankAggregator,
            Some("bank-item-1"),
            &conn,
        )
        .unwrap();
        attach_pocket("acc-1", "pocket-1", &conn).unwrap();

        assert_eq!(list_active_links(&conn).unwrap().len(), 1);

        invalidate_credential(Provider::BankAggregator, &conn).unwrap();

        assert_eq!(list_active_links(&conn).unwrap().len(), 0);

        // Replacing the credential makes the link active again.
        store_credential(Provider::BankAggregator, "bank-item-2", &conn).unwrap();

        assert_eq!(list_active_links(&conn).unwrap().len(), 1);
    }
}
