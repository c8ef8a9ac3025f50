//! The internal ledger: the banking endpoint that holds the user's
//! sub-accounts and executes transfers between them.

mod crew;

use async_trait::async_trait;

use crate::{Error, money::Money};

pub use crew::CrewLedgerClient;

/// An internal sub-account ("pocket") on the banking side.
#[derive(Debug, Clone, PartialEq)]
pub struct Subaccount {
    /// The ledger-issued id of the sub-account.
    pub id: String,
    /// The sub-account's display name, e.g. "Checking".
    pub name: String,
    /// The sub-account's current overall balance.
    pub balance: Money,
}

/// The operations the reconciliation engine needs from the banking endpoint.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// List every sub-account with its current balance.
    ///
    /// # Errors
    /// Returns [Error::LedgerError] if the ledger request fails.
    async fn list_subaccounts(&self) -> Result<Vec<Subaccount>, Error>;

    /// The current balance of one sub-account.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if the sub-account does not exist, or
    /// [Error::LedgerError] if the ledger request fails.
    async fn subaccount_balance(&self, subaccount_id: &str) -> Result<Money, Error> {
        self.list_subaccounts()
            .await?
            .into_iter()
            .find(|subaccount| subaccount.id == subaccount_id)
            .map(|subaccount| subaccount.balance)
            .ok_or(Error::NotFound)
    }

    /// Move `amount` from one sub-account to another, recording `note` on the
    /// transfer for auditability.
    ///
    /// # Errors
    /// Returns [Error::LedgerError] if the transfer is rejected or the request
    /// fails.
    async fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        amount: Money,
        note: &str,
    ) -> Result<(), Error>;

    /// Create a new savings pocket and return its id.
    ///
    /// # Errors
    /// Returns [Error::LedgerError] if the ledger request fails.
    async fn create_pocket(&self, name: &str) -> Result<String, Error>;

    /// Delete a pocket. The caller is responsible for draining its balance
    /// first.
    ///
    /// # Errors
    /// Returns [Error::LedgerError] if the ledger request fails.
    async fn delete_pocket(&self, subaccount_id: &str) -> Result<(), Error>;
}
