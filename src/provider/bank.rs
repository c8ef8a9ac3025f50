//! Adapter for the bank-aggregation protocol.
//!
//! One shared access credential serves every account behind this provider.
//! Transaction queries are windowed by calendar date; the engine defaults to
//! the last 90 days through now. An HTTP 403 from any endpoint means the
//! shared credential has been revoked.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use time::{
    OffsetDateTime, Time,
    format_description::well_known::Rfc3339,
    macros::format_description,
};

use crate::{Error, money::Money};

use super::{FetchedTransaction, ProviderAdapter, SyncWindow, error_for_status};

/// A client for the bank aggregator's REST API.
pub struct BankClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl BankClient {
    /// Create a client using the provider-wide shared access token.
    pub fn new(base_url: &str, access_token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Could not create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            access_token: access_token.to_owned(),
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, Error> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|error| Error::ProviderUnavailable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(error_for_status(response.status()));
        }

        response
            .json()
            .await
            .map_err(|error| Error::ProviderUnavailable(error.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for BankClient {
    async fn fetch_balance(&self, external_account_id: &str) -> Result<Money, Error> {
        let payload: BalancesResponse = self
            .post_json(
                "/accounts/balance/get",
                &json!({
                    "access_token": self.access_token,
                    "account_ids": [external_account_id],
                }),
            )
            .await?;

        let account = payload
            .accounts
            .into_iter()
            .find(|account| account.account_id == external_account_id)
            .ok_or(Error::NotFound)?;

        Ok(Money::from_dollars(account.balances.current).abs())
    }

    async fn fetch_transactions(
        &self,
        external_account_id: &str,
        window: &SyncWindow,
    ) -> Result<Vec<FetchedTransaction>, Error> {
        let date_format = format_description!("[year]-[month]-[day]");
        let start_date = window
            .since
            .date()
            .format(&date_format)
            .map_err(|error| Error::ProviderUnavailable(error.to_string()))?;
        let end_date = window
            .until
            .date()
            .format(&date_format)
            .map_err(|error| Error::ProviderUnavailable(error.to_string()))?;

        let payload: TransactionsResponse = self
            .post_json(
                "/transactions/get",
                &json!({
                    "access_token": self.access_token,
                    "account_ids": [external_account_id],
                    "start_date": start_date,
                    "end_date": end_date,
                }),
            )
            .await?;

        Ok(payload
            .transactions
            .into_iter()
            // The protocol can return sibling accounts under the same
            // credential even when filtered; keep only the requested one.
            .filter(|raw| {
                raw.account_id.as_deref() == Some(external_account_id)
                    || raw.account_id.is_none()
            })
            .filter_map(normalize_transaction)
            .collect())
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    accounts: Vec<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    account_id: String,
    balances: RawBalances,
}

#[derive(Debug, Deserialize)]
struct RawBalances {
    current: f64,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTransaction {
    transaction_id: Option<String>,
    account_id: Option<String>,
    /// Signed dollar amount; positive values are debits in this protocol.
    amount: Option<f64>,
    /// The posted date, `YYYY-MM-DD`.
    date: Option<String>,
    /// The date the card was charged, `YYYY-MM-DD`.
    authorized_date: Option<String>,
    name: Option<String>,
    merchant_name: Option<String>,
    #[serde(default)]
    pending: bool,
}

/// Map one raw bank record into the canonical shape.
fn normalize_transaction(raw: RawTransaction) -> Option<FetchedTransaction> {
    let (Some(id), Some(amount)) = (raw.transaction_id, raw.amount) else {
        tracing::warn!("skipping bank transaction with missing id or amount");
        return None;
    };

    let occurred_at =
        parse_day(raw.date.as_deref()).or_else(|| parse_day(raw.authorized_date.as_deref()));

    Some(FetchedTransaction {
        transaction_id: id,
        amount: Money::from_dollars(amount).abs(),
        occurred_at,
        description: raw.name,
        merchant: raw.merchant_name,
        is_pending: raw.pending || occurred_at.is_none(),
    })
}

/// Parse a `YYYY-MM-DD` day into the midnight UTC instant.
fn parse_day(value: Option<&str>) -> Option<OffsetDateTime> {
    let value = value?;

    // Accept full RFC 3339 instants as well; some deployments send them.
    if let Ok(instant) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(instant);
    }

    let date_format = format_description!("[year]-[month]-[day]");
    match time::Date::parse(value, &date_format) {
        Ok(date) => Some(date.with_time(Time::MIDNIGHT).assume_utc()),
        Err(error) => {
            tracing::warn!("could not parse bank transaction date {value:?}: {error}");
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod normalize_tests {
    use time::macros::datetime;

    use crate::Money;

    use super::{RawTransaction, normalize_transaction};

    fn raw(id: &str, amount: f64) -> RawTransaction {
        RawTransaction {
            transaction_id: Some(id.to_owned()),
            account_id: Some("acc-1".to_owned()),
            amount: Some(amount),
            ..RawTransaction::default()
        }
    }

    #[test]
    fn refunds_are_stored_as_magnitudes() {
        let transaction = normalize_transaction(raw("t1", -20.0)).unwrap();

        assert_eq!(transaction.amount, Money::from_dollars(20.0));
    }

    #[test]
    fn posted_date_is_preferred_over_authorized_date() {
        let transaction = normalize_transaction(RawTransaction {
            date: Some("2025-06-02".to_owned()),
            authorized_date: Some("2025-06-01".to_owned()),
            ..raw("t1", 1.0)
        })
        .unwrap();

        assert_eq!(
            transaction.occurred_at,
            Some(datetime!(2025-06-02 0:00 UTC))
        );
    }

    #[test]
    fn authorized_date_is_the_fallback() {
        let transaction = normalize_transaction(RawTransaction {
            authorized_date: Some("2025-06-01".to_owned()),
            ..raw("t1", 1.0)
        })
        .unwrap();

        assert_eq!(
            transaction.occurred_at,
            Some(datetime!(2025-06-01 0:00 UTC))
        );
    }

    #[test]
    fn pending_without_dates_keeps_null_timestamp() {
        let transaction = normalize_transaction(RawTransaction {
            pending: true,
            ..raw("t1", 1.0)
        })
        .unwrap();

        assert_eq!(transaction.occurred_at, None);
        assert!(transaction.is_pending);
    }

    #[test]
    fn record_without_transaction_id_is_skipped() {
        let transaction = normalize_transaction(RawTransaction {
            transaction_id: None,
            amount: Some(1.0),
            ..RawTransaction::default()
        });

        assert_eq!(transaction, None);
    }

    #[test]
    fn malformed_date_downgrades_to_pending() {
        let transaction = normalize_transaction(RawTransaction {
            date: Some("06/01/2025".to_owned()),
            ..raw("t1", 1.0)
        })
        .unwrap();

        assert_eq!(transaction.occurred_at, None);
        assert!(transaction.is_pending);
    }
}
