//! GraphQL client for the Crew banking endpoint.
//!
//! The wire contract is the banking app's own GraphQL API: balances travel as
//! integer cents, sub-accounts are "subaccounts" of a top-level account, and
//! the primary account is the one displayed as "Checking".

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::{Error, money::Money};

use super::{LedgerClient, Subaccount};

const LIST_SUBACCOUNTS_QUERY: &str =
    "query CurrentUser { currentUser { accounts { subaccounts { id name overallBalance } } } }";

const LIST_ACCOUNTS_QUERY: &str =
    "query CurrentUser { currentUser { accounts { id displayName } } }";

const INITIATE_TRANSFER_MUTATION: &str = "mutation InitiateTransfer($input: InitiateTransferInput!) \
     { initiateTransfer(input: $input) { result { id } } }";

const CREATE_SUBACCOUNT_MUTATION: &str = "mutation CreateSubaccount($input: CreateSubaccountInput!) \
     { createSubaccount(input: $input) { result { id name } } }";

const DELETE_SUBACCOUNT_MUTATION: &str = "mutation DeleteSubaccount($id: ID!) \
     { deleteSubaccount(input: { subaccountId: $id }) { result { id status } } }";

/// A client for the Crew banking GraphQL endpoint.
pub struct CrewLedgerClient {
    client: reqwest::Client,
    url: String,
    bearer_token: String,
}

impl CrewLedgerClient {
    /// Create a client for the GraphQL endpoint at `url`.
    pub fn new(url: &str, bearer_token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Could not create HTTP client");

        Self {
            client,
            url: url.to_owned(),
            bearer_token: bearer_token.to_owned(),
        }
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        operation_name: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, Error> {
        let response = self
            .client
            .post(&self.url)
            .header("authorization", &self.bearer_token)
            .json(&json!({
                "operationName": operation_name,
                "query": query,
                "variables": variables,
            }))
            .send()
            .await
            .map_err(|error| Error::LedgerError(error.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::LedgerError(format!(
                "unexpected HTTP status {}",
                response.status()
            )));
        }

        let payload: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|error| Error::LedgerError(error.to_string()))?;

        if let Some(error) = payload.errors.first() {
            return Err(Error::LedgerError(error.message.clone()));
        }

        payload
            .data
            .ok_or_else(|| Error::LedgerError("response contained no data".to_owned()))
    }

    /// The id of the top-level account that holds the user's pockets.
    ///
    /// Prefers the account displayed as "Checking", falling back to the first
    /// account. Only needed when creating a pocket, so it is fetched on
    /// demand rather than cached.
    async fn primary_account_id(&self) -> Result<String, Error> {
        let data: AccountListData = self
            .execute("CurrentUser", LIST_ACCOUNTS_QUERY, json!({}))
            .await?;

        let accounts = data.current_user.accounts;

        accounts
            .iter()
            .find(|account| account.display_name.as_deref() == Some("Checking"))
            .or_else(|| accounts.first())
            .map(|account| account.id.clone())
            .ok_or_else(|| Error::LedgerError("the user has no accounts".to_owned()))
    }
}

#[async_trait]
impl LedgerClient for CrewLedgerClient {
    async fn list_subaccounts(&self) -> Result<Vec<Subaccount>, Error> {
        let data: SubaccountListData = self
            .execute("CurrentUser", LIST_SUBACCOUNTS_QUERY, json!({}))
            .await?;

        Ok(data
            .current_user
            .accounts
            .into_iter()
            .flat_map(|account| account.subaccounts)
            .map(|subaccount| Subaccount {
                id: subaccount.id,
                name: subaccount.name,
                // The API returns balances in cents.
                balance: Money::from_cents(subaccount.overall_balance),
            })
            .collect())
    }

    async fn transfer(
        &self,
        from_id: &str,
        to_id: &str,
        amount: Money,
        note: &str,
    ) -> Result<(), Error> {
        let _: serde_json::Value = self
            .execute(
                "InitiateTransfer",
                INITIATE_TRANSFER_MUTATION,
                json!({
                    "input": {
                        "amount": amount.cents(),
                        "accountFromId": from_id,
                        "accountToId": to_id,
                        "note": if note.is_empty() { "Transfer" } else { note },
                    }
                }),
            )
            .await?;

        Ok(())
    }

    async fn create_pocket(&self, name: &str) -> Result<String, Error> {
        let account_id = self.primary_account_id().await?;

        let data: CreateSubaccountData = self
            .execute(
                "CreateSubaccount",
                CREATE_SUBACCOUNT_MUTATION,
                json!({
                    "input": {
                        "type": "SAVINGS",
                        "piggyBanked": false,
                        "accountId": account_id,
                        "name": name,
                        "targetAmount": 0,
                        "initialTransferAmount": 0,
                        "note": "Tracks an external account",
                    }
                }),
            )
            .await?;

        Ok(data.create_subaccount.result.id)
    }

    async fn delete_pocket(&self, subaccount_id: &str) -> Result<(), Error> {
        let _: serde_json::Value = self
            .execute(
                "DeleteSubaccount",
                DELETE_SUBACCOUNT_MUTATION,
                json!({ "id": subaccount_id }),
            )
            .await?;

        Ok(())
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubaccountListData {
    #[serde(rename = "currentUser")]
    current_user: SubaccountListUser,
}

#[derive(Debug, Deserialize)]
struct SubaccountListUser {
    #[serde(default)]
    accounts: Vec<SubaccountListAccount>,
}

#[derive(Debug, Deserialize)]
struct SubaccountListAccount {
    #[serde(default)]
    subaccounts: Vec<RawSubaccount>,
}

#[derive(Debug, Deserialize)]
struct RawSubaccount {
    id: String,
    name: String,
    #[serde(rename = "overallBalance")]
    overall_balance: i64,
}

#[derive(Debug, Deserialize)]
struct AccountListData {
    #[serde(rename = "currentUser")]
    current_user: AccountListUser,
}

#[derive(Debug, Deserialize)]
struct AccountListUser {
    #[serde(default)]
    accounts: Vec<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    id: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateSubaccountData {
    #[serde(rename = "createSubaccount")]
    create_subaccount: CreateSubaccountBody,
}

#[derive(Debug, Deserialize)]
struct CreateSubaccountBody {
    result: CreatedSubaccount,
}

#[derive(Debug, Deserialize)]
struct CreatedSubaccount {
    id: String,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod wire_format_tests {
    use crate::Money;

    use super::{GraphQlResponse, SubaccountListData};

    #[test]
    fn subaccount_balances_are_cents() {
        let payload = r#"{
            "data": {
                "currentUser": {
                    "accounts": [
                        { "subaccounts": [
                            { "id": "sub-1", "name": "Checking", "overallBalance": 123456 },
                            { "id": "sub-2", "name": "Card Pocket", "overallBalance": 5500 }
                        ] }
                    ]
                }
            }
        }"#;

        let response: GraphQlResponse<SubaccountListData> =
            serde_json::from_str(payload).unwrap();
        let data = response.data.unwrap();
        let subaccounts = &data.current_user.accounts[0].subaccounts;

        assert_eq!(
            Money::from_cents(subaccounts[0].overall_balance),
            Money::from_dollars(1234.56)
        );
        assert_eq!(subaccounts[1].name, "Card Pocket");
    }

    #[test]
    fn graphql_errors_are_surfaced() {
        let payload = r#"{ "errors": [ { "message": "Insufficient funds" } ] }"#;

        let response: GraphQlResponse<SubaccountListData> =
            serde_json::from_str(payload).unwrap();

        assert!(response.data.is_none());
        assert_eq!(response.errors[0].message, "Insufficient funds");
    }
}
