//! Provider adapters translate each aggregator's native transaction and
//! balance representation into the engine's canonical shapes.
//!
//! Both adapters expose the same two operations and the same error contract:
//! a revoked credential maps to [Error::CredentialRevoked], every other
//! failure to [Error::ProviderUnavailable]. Unparseable records are skipped
//! with a warning rather than failing the whole fetch.

mod bank;
mod merchant;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

use crate::{Error, money::Money};

pub use bank::BankClient;
pub use merchant::MerchantClient;

/// A transaction in the engine's canonical shape, as produced by a provider
/// adapter.
///
/// Amounts are non-negative magnitudes; the engine always treats synced
/// amounts as debits against the tracked account.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedTransaction {
    /// Provider-issued identity, unique within the account.
    pub transaction_id: String,
    /// The transaction amount as an unsigned magnitude.
    pub amount: Money,
    /// When the transaction occurred, preferring the posted instant over the
    /// transacted one. None when the provider supplied neither.
    pub occurred_at: Option<OffsetDateTime>,
    /// A text description of the transaction, if the provider supplied one.
    pub description: Option<String>,
    /// The merchant name, if the provider supplied one.
    pub merchant: Option<String>,
    /// Whether the provider has not yet posted/settled the transaction.
    pub is_pending: bool,
}

/// A half-open time range `[since, until)` to fetch transactions within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    /// The inclusive start of the window.
    pub since: OffsetDateTime,
    /// The exclusive end of the window.
    pub until: OffsetDateTime,
}

impl SyncWindow {
    /// The window covering the last `days` days through `until`.
    pub fn last_days(days: i64, until: OffsetDateTime) -> Self {
        Self {
            since: until - Duration::days(days),
            until,
        }
    }
}

/// Fetches balances and transactions from one external account aggregator.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The current balance of the external account, as a magnitude.
    ///
    /// # Errors
    /// Returns [Error::CredentialRevoked] if the provider rejects the access
    /// credential, or [Error::ProviderUnavailable] on any other failure.
    async fn fetch_balance(&self, external_account_id: &str) -> Result<Money, Error>;

    /// The transactions for the external account within `window`, ordered as
    /// the provider returns them.
    ///
    /// Adapters for providers without windowed queries ignore `window` and
    /// return the full available history.
    ///
    /// # Errors
    /// Returns [Error::CredentialRevoked] if the provider rejects the access
    /// credential, or [Error::ProviderUnavailable] on any other failure.
    async fn fetch_transactions(
        &self,
        external_account_id: &str,
        window: &SyncWindow,
    ) -> Result<Vec<FetchedTransaction>, Error>;
}

/// Map an HTTP status to the adapter error contract.
///
/// HTTP 403 is the revoked-credential signal shared by both aggregators.
pub(crate) fn error_for_status(status: reqwest::StatusCode) -> Error {
    if status == reqwest::StatusCode::FORBIDDEN {
        Error::CredentialRevoked
    } else {
        Error::ProviderUnavailable(format!("unexpected HTTP status {status}"))
    }
}

#[cfg(test)]
mod sync_window_tests {
    use time::macros::datetime;

    use super::SyncWindow;

    #[test]
    fn last_days_spans_backwards_from_until() {
        let until = datetime!(2025-06-01 12:00 UTC);

        let window = SyncWindow::last_days(90, until);

        assert_eq!(window.until, until);
        assert_eq!(window.since, datetime!(2025-03-03 12:00 UTC));
    }
}
