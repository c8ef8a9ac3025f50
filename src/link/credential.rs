//! Shared provider credential records.
//!
//! The bank aggregator serves many accounts through one access credential.
//! Only the validity flag lives here; the secret itself is supplied to the
//! adapter via the environment and never written to the database.

use rusqlite::Connection;

use crate::Error;

use super::Provider;

/// Create the provider credential table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_provider_credential_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS provider_credential (
                provider TEXT PRIMARY KEY,
                credential_ref TEXT NOT NULL,
                is_valid INTEGER NOT NULL DEFAULT 1
                )",
        (),
    )?;

    Ok(())
}

/// Record (or replace) the shared credential for a provider and mark it valid.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn store_credential(
    provider: Provider,
    credential_ref: &str,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO provider_credential (provider, credential_ref, is_valid)
         VALUES (?1, ?2, 1)
         ON CONFLICT (provider) DO UPDATE SET credential_ref = ?2, is_valid = 1",
        (provider.as_str(), credential_ref),
    )?;

    Ok(())
}

/// Mark the shared credential for a provider as revoked.
///
/// All links that depend on this credential are skipped by subsequent polls
/// until the credential is replaced with [store_credential]. A provider
/// without a stored record gets one inserted in the revoked state, so
/// revocation sticks even when the credential itself only lives in the
/// environment.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn invalidate_credential(provider: Provider, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO provider_credential (provider, credential_ref, is_valid)
         VALUES (?1, '', 0)
         ON CONFLICT (provider) DO UPDATE SET is_valid = 0",
        (provider.as_str(),),
    )?;

    Ok(())
}

/// Whether the provider's shared credential is currently usable.
///
/// A provider without a credential record is treated as valid.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn credential_is_valid(provider: Provider, connection: &Connection) -> Result<bool, Error> {
    let valid = connection
        .prepare("SELECT is_valid FROM provider_credential WHERE provider = :provider")?
        .query_one(&[(":provider", provider.as_str())], |row| {
            row.get::<_, bool>(0)
        });

    match valid {
        Ok(valid) => Ok(valid),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(true),
        Err(error) => Err(error.into()),
    }
}

#[cfg(test)]
mod credential_tests {
    use rusqlite::Connection;

    use crate::{db::initialize, link::Provider};

    use super::{credential_is_valid, invalidate_credential, store_credential};

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn missing_credential_is_treated_as_valid() {
        let conn = get_test_connection();

        assert!(credential_is_valid(Provider::MerchantAggregator, &conn).unwrap());
    }

    #[test]
    fn invalidate_without_stored_record_sticks() {
        let conn = get_test_connection();

        invalidate_credential(Provider::MerchantAggregator, &conn).unwrap();

        assert!(!credential_is_valid(Provider::MerchantAggregator, &conn).unwrap());

        store_credential(Provider::MerchantAggregator, "key-2", &conn).unwrap();
        assert!(credential_is_valid(Provider::MerchantAggregator, &conn).unwrap());
    }

    #[test]
    fn invalidate_then_replace() {
        let conn = get_test_connection();
        store_credential(Provider::BankAggregator, "bank-item-1", &conn).unwrap();
        assert!(credential_is_valid(Provider::BankAggregator, &conn).unwrap());

        invalidate_credential(Provider::BankAggregator, &conn).unwrap();
        assert!(!credential_is_valid(Provider::BankAggregator, &conn).unwrap());

        store_credential(Provider::BankAggregator, "bank-item-2", &conn).unwrap();
        assert!(credential_is_valid(Provider::BankAggregator, &conn).unwrap());
    }
}
