//! Creates the application's database tables.

use rusqlite::Connection;

use crate::{
    Error,
    link::{create_linked_account_table, create_provider_credential_table},
    transaction::create_synced_transaction_table,
};

/// Create the tables for the application's data models.
///
/// All tables are created in a single exclusive transaction so a partially
/// initialized schema is never left behind.
///
/// # Errors
/// Returns an error if a table cannot be created or if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let transaction = rusqlite::Transaction::new_unchecked(
        connection,
        rusqlite::TransactionBehavior::Exclusive,
    )?;

    create_linked_account_table(&transaction)?;
    create_synced_transaction_table(&transaction)?;
    create_provider_credential_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

#[cfg(test)]
mod initialize_tests {
    use rusqlite::Connection;

    use super::initialize;

    #[test]
    fn sql_is_valid() {
        let connection =
            Connection::open_in_memory().expect("Could not initialise in-memory SQLite database");

        assert!(initialize(&connection).is_ok());
    }

    #[test]
    fn initialize_is_idempotent() {
        let connection = Connection::open_in_memory().unwrap();

        initialize(&connection).expect("Could not initialise database");
        initialize(&connection).expect("Second initialise should be a no-op");
    }
}
