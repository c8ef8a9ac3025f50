//! Adapter for the merchant-style aggregator.
//!
//! The merchant API exposes one card account per API key and has no window
//! parameter: every transaction fetch returns the full available history.
//! Amounts arrive as signed dollar floats and are normalized to magnitudes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{Error, money::Money};

use super::{FetchedTransaction, ProviderAdapter, SyncWindow, error_for_status};

/// A client for the merchant aggregator's REST API.
pub struct MerchantClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MerchantClient {
    /// Create a client for the merchant aggregator hosted at `base_url`.
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Could not create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
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
impl ProviderAdapter for MerchantClient {
    async fn fetch_balance(&self, external_account_id: &str) -> Result<Money, Error> {
        let payload: AccountResponse = self
            .get_json(&format!("/v1/accounts/{external_account_id}"))
            .await?;

        Ok(Money::from_dollars(payload.account.balance).abs())
    }

    async fn fetch_transactions(
        &self,
        external_account_id: &str,
        _window: &SyncWindow,
    ) -> Result<Vec<FetchedTransaction>, Error> {
        let payload: TransactionsResponse = self
            .get_json(&format!("/v1/accounts/{external_account_id}/transactions"))
            .await?;

        Ok(payload
            .transactions
            .into_iter()
            .filter_map(normalize_transaction)
            .collect())
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: AccountBody,
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    balance: f64,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTransaction {
    id: Option<String>,
    amount: Option<f64>,
    /// When the transaction settled, RFC 3339.
    posted_at: Option<String>,
    /// When the card was charged, RFC 3339.
    transacted_at: Option<String>,
    description: Option<String>,
    merchant: Option<String>,
    #[serde(default)]
    pending: bool,
}

/// Map one raw merchant record into the canonical shape.
///
/// Records missing an id or amount cannot be deduplicated or reconciled, so
/// they are skipped with a warning rather than crashing the fetch.
fn normalize_transaction(raw: RawTransaction) -> Option<FetchedTransaction> {
    let (Some(id), Some(amount)) = (raw.id, raw.amount) else {
        tracing::warn!("skipping merchant transaction with missing id or amount");
        return None;
    };

    let occurred_at = parse_instant(raw.posted_at.as_deref())
        .or_else(|| parse_instant(raw.transacted_at.as_deref()));

    Some(FetchedTransaction {
        transaction_id: id,
        amount: Money::from_dollars(amount).abs(),
        occurred_at,
        description: raw.description,
        merchant: raw.merchant,
        is_pending: raw.pending || occurred_at.is_none(),
    })
}

fn parse_instant(value: Option<&str>) -> Option<OffsetDateTime> {
    let value = value?;

    match OffsetDateTime::parse(value, &Rfc3339) {
        Ok(instant) => Some(instant),
        Err(error) => {
            tracing::warn!("could not parse merchant timestamp {value:?}: {error}");
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
            id: Some(id.to_owned()),
            amount: Some(amount),
            ..RawTransaction::default()
        }
    }

    #[test]
    fn amount_sign_is_discarded() {
        let transaction = normalize_transaction(raw("t1", -12.5)).unwrap();

        assert_eq!(transaction.amount, Money::from_dollars(12.5));
    }

    #[test]
    fn posted_instant_is_preferred() {
        let transaction = normalize_transaction(RawTransaction {
            posted_at: Some("2025-06-02T00:00:00Z".to_owned()),
            transacted_at: Some("2025-06-01T00:00:00Z".to_owned()),
            ..raw("t1", 1.0)
        })
        .unwrap();

        assert_eq!(
            transaction.occurred_at,
            Some(datetime!(2025-06-02 0:00 UTC))
        );
    }

    #[test]
    fn transacted_instant_is_the_fallback() {
        let transaction = normalize_transaction(RawTransaction {
            transacted_at: Some("2025-06-01T00:00:00Z".to_owned()),
            ..raw("t1", 1.0)
        })
        .unwrap();

        assert_eq!(
            transaction.occurred_at,
            Some(datetime!(2025-06-01 0:00 UTC))
        );
        assert!(!transaction.is_pending);
    }

    #[test]
    fn missing_timestamps_mark_the_transaction_pending() {
        let transaction = normalize_transaction(raw("t1", 1.0)).unwrap();

        assert_eq!(transaction.occurred_at, None);
        assert!(transaction.is_pending);
    }

    #[test]
    fn unparseable_timestamp_is_treated_as_missing() {
        let transaction = normalize_transaction(RawTransaction {
            posted_at: Some("last tuesday".to_owned()),
            ..raw("t1", 1.0)
        })
        .unwrap();

        assert_eq!(transaction.occurred_at, None);
        assert!(transaction.is_pending);
    }

    #[test]
    fn record_without_id_is_skipped() {
        let transaction = normalize_transaction(RawTransaction {
            id: None,
            amount: Some(1.0),
            ..RawTransaction::default()
        });

        assert_eq!(transaction, None);
    }

    #[test]
    fn record_without_amount_is_skipped() {
        let transaction = normalize_transaction(RawTransaction {
            id: Some("t1".to_owned()),
            amount: None,
            ..RawTransaction::default()
        });

        assert_eq!(transaction, None);
    }
}
