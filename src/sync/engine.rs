//! The reconciliation engine: brings each internal tracking pocket into
//! agreement with the external account it is linked to.
//!
//! Reconciliation is anchored to the provider's authoritative balance rather
//! than to the sum of observed transactions. Transaction feeds can be
//! incomplete, reordered, or windowed; diffing against the balance self-heals
//! any drift while per-transaction dedup still gives the UI an auditable
//! activity feed. The count of newly seen transactions is recorded on the
//! transfer note as an audit annotation only; it never drives a transfer of
//! its own.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use rusqlite::Connection;
use time::OffsetDateTime;

use crate::{
    Error,
    cache::CacheInvalidator,
    ledger::LedgerClient,
    link::{
        LinkedAccount, Provider, attach_pocket, create_link, credential_is_valid, get_link,
        invalidate_credential, list_active_links, remove_link,
    },
    money::Money,
    provider::{FetchedTransaction, ProviderAdapter, SyncWindow},
    transaction::{
        SyncedTransaction, insert_if_absent, list_all_transactions, list_transactions_for_account,
    },
};

use super::cursor::SyncCursors;

/// A delta of at most one cent is rounding noise, not drift. Transferring it
/// would oscillate forever as float balances round back and forth.
const RECONCILE_EPSILON_CENTS: i64 = 1;

/// The default transaction fetch window for windowed providers.
const DEFAULT_SYNC_WINDOW_DAYS: i64 = 90;

// ============================================================================
// MODELS
// ============================================================================

/// Static configuration for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The sub-account that reconciliation transfers draw from and release
    /// to, usually the user's checking pocket.
    pub primary_pocket_id: String,
    /// How far back windowed providers fetch transactions.
    pub sync_window_days: i64,
}

impl EngineConfig {
    /// Configuration with the default 90 day sync window.
    pub fn new(primary_pocket_id: &str) -> Self {
        Self {
            primary_pocket_id: primary_pocket_id.to_owned(),
            sync_window_days: DEFAULT_SYNC_WINDOW_DAYS,
        }
    }
}

/// Why a reconciliation pass is running, which decides gating and transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// The first pass after linking. Historical transactions are stored but
    /// must not be replayed as spending; the pocket is only funded when
    /// `sync_balance` is set, via a single balance-delta transfer.
    Initial {
        /// Whether to bring the pocket up to the external balance.
        sync_balance: bool,
    },
    /// A scheduler tick. Subject to the per-account rate gate.
    Scheduled,
    /// An explicit request from the route layer. Bypasses the rate gate.
    Requested,
}

/// A transfer the engine decided to make while reconciling one account.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilingTransfer {
    /// The sub-account the money came from.
    pub from_id: String,
    /// The sub-account the money went to.
    pub to_id: String,
    /// The amount moved, always positive.
    pub amount: Money,
    /// The audit note recorded on the transfer.
    pub note: String,
}

/// What one reconciliation pass did for one linked account.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// The account the pass ran for.
    pub external_account_id: String,
    /// How many fetched transactions were newly inserted.
    pub new_transactions: u32,
    /// The reconciling transfer, if the balance delta warranted one.
    pub transfer: Option<ReconcilingTransfer>,
    /// Whether the pass was skipped by the rate gate.
    pub skipped: bool,
}

impl SyncOutcome {
    fn skipped(external_account_id: &str) -> Self {
        Self {
            external_account_id: external_account_id.to_owned(),
            new_transactions: 0,
            transfer: None,
            skipped: true,
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Orchestrates fetch, dedup-ingest, and delta reconciliation for every
/// linked account.
///
/// The engine is the sole writer of synced transactions, pocket attachments,
/// and cursors. A single async lock serializes every fetch-ingest-transfer
/// sequence, so the scheduled path and ad hoc requests can never double-move
/// money for the same account.
pub struct SyncEngine {
    connection: Arc<Mutex<Connection>>,
    ledger: Box<dyn LedgerClient>,
    adapters: HashMap<Provider, Box<dyn ProviderAdapter>>,
    cache: Box<dyn CacheInvalidator>,
    cursors: Mutex<SyncCursors>,
    reconcile_lock: tokio::sync::Mutex<()>,
    config: EngineConfig,
}

impl SyncEngine {
    /// Create an engine with no provider adapters registered.
    pub fn new(
        connection: Arc<Mutex<Connection>>,
        ledger: Box<dyn LedgerClient>,
        cache: Box<dyn CacheInvalidator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            connection,
            ledger,
            adapters: HashMap::new(),
            cache,
            cursors: Mutex::new(SyncCursors::new()),
            reconcile_lock: tokio::sync::Mutex::new(()),
            config,
        }
    }

    /// Register the adapter for one provider.
    pub fn with_adapter(mut self, provider: Provider, adapter: Box<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(provider, adapter);
        self
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.connection.lock().map_err(|_| Error::DatabaseLock)
    }

    /// Register an external account for tracking.
    ///
    /// The link starts without a tracking pocket and is not polled until
    /// [SyncEngine::create_tracking_pocket] attaches one.
    ///
    /// # Errors
    /// Returns [Error::AlreadyLinked] if the external account is already
    /// registered.
    pub fn link_account(
        &self,
        provider: Provider,
        external_account_id: &str,
        display_name: &str,
        shared_credential_ref: Option<&str>,
    ) -> Result<LinkedAccount, Error> {
        let link = {
            let connection = self.connection()?;
            create_link(
                external_account_id,
                display_name,
                provider,
                shared_credential_ref,
                &connection,
            )?
        };

        self.cache.invalidate_all();

        Ok(link)
    }

    /// Create the tracking pocket for a linked account and run its initial
    /// sync.
    ///
    /// The pocket is created on the ledger exactly once and attached to the
    /// link. Historical transactions from the initial sync are stored without
    /// triggering transfers; when `sync_balance` is set the pocket is brought
    /// up to the external balance by one balance-delta transfer.
    ///
    /// # Errors
    /// Returns [Error::AlreadyLinked] if the link already has a pocket,
    /// [Error::NotFound] if the account is not registered, or any fetch or
    /// ledger failure from the initial sync.
    pub async fn create_tracking_pocket(
        &self,
        external_account_id: &str,
        sync_balance: bool,
    ) -> Result<SyncOutcome, Error> {
        let _guard = self.reconcile_lock.lock().await;

        let link = {
            let connection = self.connection()?;
            get_link(external_account_id, &connection)?
        };

        if link.internal_pocket_id.is_some() {
            return Err(Error::AlreadyLinked);
        }

        let pocket_id = self.ledger.create_pocket(&link.display_name).await?;

        {
            let connection = self.connection()?;
            attach_pocket(external_account_id, &pocket_id, &connection)?;
        }

        tracing::info!(
            "created tracking pocket {pocket_id} for external account {external_account_id}"
        );

        let link = LinkedAccount {
            internal_pocket_id: Some(pocket_id),
            ..link
        };

        let outcome = self
            .reconcile_link(&link, ReconcileMode::Initial { sync_balance })
            .await?;

        self.cache.invalidate_all();

        Ok(outcome)
    }

    /// Reconcile one linked account immediately, bypassing the rate gate.
    ///
    /// Serialized against the scheduled path by the engine lock.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if the account is not registered or has no
    /// pocket, [Error::CredentialRevoked] if the provider credential is
    /// invalid, or any fetch or ledger failure.
    pub async fn sync_now(&self, external_account_id: &str) -> Result<SyncOutcome, Error> {
        let _guard = self.reconcile_lock.lock().await;

        let link = {
            let connection = self.connection()?;
            let link = get_link(external_account_id, &connection)?;

            // Short-circuit before any provider call when the credential is
            // known to be revoked.
            if !credential_is_valid(link.provider, &connection)? {
                return Err(Error::CredentialRevoked);
            }

            link
        };

        if link.internal_pocket_id.is_none() {
            return Err(Error::NotFound);
        }

        self.reconcile_link(&link, ReconcileMode::Requested).await
    }

    /// Reconcile every active link: one scheduler tick.
    ///
    /// A failure for one account is logged and never aborts the tick, so one
    /// bad account cannot starve the others.
    ///
    /// # Errors
    /// Returns an error only if the active links cannot be listed.
    pub async fn reconcile_all(&self) -> Result<Vec<SyncOutcome>, Error> {
        let _guard = self.reconcile_lock.lock().await;

        let links = {
            let connection = self.connection()?;
            list_active_links(&connection)?
        };

        let mut outcomes = Vec::with_capacity(links.len());

        for link in links {
            match self.reconcile_link(&link, ReconcileMode::Scheduled).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    tracing::error!(
                        "could not reconcile external account {}: {error}",
                        link.external_account_id
                    );
                }
            }
        }

        Ok(outcomes)
    }

    /// Stop tracking an external account.
    ///
    /// Any residual pocket balance is transferred back to the primary account
    /// before the pocket is deleted; the link and its synced transactions are
    /// then removed. Returns the residual amount that was returned.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if the account is not registered, or
    /// [Error::LedgerError] if draining or deleting the pocket fails.
    pub async fn unlink_account(&self, external_account_id: &str) -> Result<Money, Error> {
        let _guard = self.reconcile_lock.lock().await;

        let link = {
            let connection = self.connection()?;
            get_link(external_account_id, &connection)?
        };

        let mut residual = Money::ZERO;

        if let Some(pocket_id) = &link.internal_pocket_id {
            let balance = self.ledger.subaccount_balance(pocket_id).await?;

            if balance.is_positive() {
                self.ledger
                    .transfer(
                        pocket_id,
                        &self.config.primary_pocket_id,
                        balance,
                        "Returning funds from unlinked account",
                    )
                    .await?;
                residual = balance;
            }

            self.ledger.delete_pocket(pocket_id).await?;
        }

        {
            let connection = self.connection()?;
            remove_link(external_account_id, &connection)?;
        }

        self.cursors
            .lock()
            .map_err(|_| Error::DatabaseLock)?
            .forget(external_account_id);

        tracing::info!("unlinked external account {external_account_id}, returned {residual}");
        self.cache.invalidate_all();

        Ok(residual)
    }

    /// List the synced transactions for one account, or for all accounts.
    ///
    /// # Errors
    /// Returns [Error::SqlError] if there is an SQL error.
    pub fn list_synced_transactions(
        &self,
        external_account_id: Option<&str>,
    ) -> Result<Vec<SyncedTransaction>, Error> {
        let connection = self.connection()?;

        match external_account_id {
            Some(id) => list_transactions_for_account(id, &connection),
            None => list_all_transactions(&connection),
        }
    }

    /// Reconcile one linked account. Callers must hold the reconcile lock.
    async fn reconcile_link(
        &self,
        link: &LinkedAccount,
        mode: ReconcileMode,
    ) -> Result<SyncOutcome, Error> {
        let now = OffsetDateTime::now_utc();

        if mode == ReconcileMode::Scheduled {
            let may_sync = self
                .cursors
                .lock()
                .map_err(|_| Error::DatabaseLock)?
                .should_sync(
                    &link.external_account_id,
                    link.provider.min_sync_interval(),
                    now,
                );

            if !may_sync {
                tracing::debug!(
                    "skipping external account {}: polled within the minimum interval",
                    link.external_account_id
                );
                return Ok(SyncOutcome::skipped(&link.external_account_id));
            }
        }

        let adapter = self.adapters.get(&link.provider).ok_or(Error::NotFound)?;
        let window = SyncWindow::last_days(self.config.sync_window_days, now);

        let fetched = self.note_revocation(
            link.provider,
            adapter
                .fetch_transactions(&link.external_account_id, &window)
                .await,
        )?;
        let external_balance = self.note_revocation(
            link.provider,
            adapter.fetch_balance(&link.external_account_id).await,
        )?;

        let new_transactions = {
            let connection = self.connection()?;
            let mut new_transactions = 0;

            for transaction in &fetched {
                let record = to_synced_transaction(&link.external_account_id, transaction);
                if insert_if_absent(&record, &connection)? {
                    new_transactions += 1;
                }
            }

            new_transactions
        };

        // The poll itself succeeded; a failed transfer below must not cause an
        // early retry against the provider.
        self.cursors
            .lock()
            .map_err(|_| Error::DatabaseLock)?
            .mark_synced(&link.external_account_id, now);

        let suppress_transfer = mode
            == ReconcileMode::Initial {
                sync_balance: false,
            };

        let transfer = if suppress_transfer {
            None
        } else {
            let pocket_id = link.internal_pocket_id.as_deref().ok_or(Error::NotFound)?;
            let pocket_balance = self.ledger.subaccount_balance(pocket_id).await?;

            let plan = plan_reconciling_transfer(
                external_balance,
                pocket_balance,
                &self.config.primary_pocket_id,
                pocket_id,
                new_transactions,
            );

            if let Some(plan) = &plan {
                self.ledger
                    .transfer(&plan.from_id, &plan.to_id, plan.amount, &plan.note)
                    .await?;

                tracing::info!(
                    "reconciled external account {}: moved {} from {} to {}",
                    link.external_account_id,
                    plan.amount,
                    plan.from_id,
                    plan.to_id
                );
                self.cache.invalidate_all();
            }

            plan
        };

        Ok(SyncOutcome {
            external_account_id: link.external_account_id.clone(),
            new_transactions,
            transfer,
            skipped: false,
        })
    }

    /// Mark the provider credential invalid when a call reports revocation,
    /// then pass the result through.
    fn note_revocation<T>(&self, provider: Provider, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(Error::CredentialRevoked) = &result {
            tracing::warn!(
                "credential for {} revoked; its links will be skipped until it is replaced",
                provider.as_str()
            );

            let connection = self.connection()?;
            invalidate_credential(provider, &connection)?;
        }

        result
    }
}

/// Decide the transfer that brings the pocket to the external balance.
///
/// Positive delta means the external balance grew and more must be reserved;
/// negative delta releases funds back to the primary account. Deltas within
/// one cent are suppressed.
fn plan_reconciling_transfer(
    external_balance: Money,
    pocket_balance: Money,
    primary_pocket_id: &str,
    pocket_id: &str,
    new_transactions: u32,
) -> Option<ReconcilingTransfer> {
    let delta = external_balance - pocket_balance;

    if delta.abs().cents() <= RECONCILE_EPSILON_CENTS {
        return None;
    }

    let note = if new_transactions > 0 {
        format!("Synced {new_transactions} new transaction(s)")
    } else {
        "Balance sync".to_owned()
    };

    if delta.is_positive() {
        Some(ReconcilingTransfer {
            from_id: primary_pocket_id.to_owned(),
            to_id: pocket_id.to_owned(),
            amount: delta,
            note,
        })
    } else {
        Some(ReconcilingTransfer {
            from_id: pocket_id.to_owned(),
            to_id: primary_pocket_id.to_owned(),
            amount: delta.abs(),
            note,
        })
    }
}

fn to_synced_transaction(
    external_account_id: &str,
    transaction: &FetchedTransaction,
) -> SyncedTransaction {
    SyncedTransaction {
        external_account_id: external_account_id.to_owned(),
        transaction_id: transaction.transaction_id.clone(),
        amount: transaction.amount,
        occurred_at: transaction.occurred_at,
        description: transaction.description.clone(),
        merchant: transaction.merchant.clone(),
        is_pending: transaction.is_pending,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod plan_tests {
    use crate::Money;

    use super::plan_reconciling_transfer;

    #[test]
    fn grown_external_balance_reserves_from_primary() {
        let plan = plan_reconciling_transfer(
            Money::from_dollars(55.0),
            Money::from_dollars(40.0),
            "primary",
            "pocket",
            0,
        )
        .expect("Expected a transfer");

        assert_eq!(plan.from_id, "primary");
        assert_eq!(plan.to_id, "pocket");
        assert_eq!(plan.amount, Money::from_dollars(15.0));
    }

    #[test]
    fn shrunk_external_balance_releases_to_primary() {
        let plan = plan_reconciling_transfer(
            Money::from_dollars(40.0),
            Money::from_dollars(55.0),
            "primary",
            "pocket",
            0,
        )
        .expect("Expected a transfer");

        assert_eq!(plan.from_id, "pocket");
        assert_eq!(plan.to_id, "primary");
        assert_eq!(plan.amount, Money::from_dollars(15.0));
    }

    #[test]
    fn one_cent_delta_is_suppressed() {
        let plan = plan_reconciling_transfer(
            Money::from_dollars(40.01),
            Money::from_dollars(40.0),
            "primary",
            "pocket",
            0,
        );

        assert_eq!(plan, None);
    }

    #[test]
    fn sub_cent_delta_rounds_away_entirely() {
        let plan = plan_reconciling_transfer(
            Money::from_dollars(40.004),
            Money::from_dollars(40.0),
            "primary",
            "pocket",
            0,
        );

        assert_eq!(plan, None);
    }

    #[test]
    fn two_cent_delta_transfers() {
        let plan = plan_reconciling_transfer(
            Money::from_dollars(40.02),
            Money::from_dollars(40.0),
            "primary",
            "pocket",
            0,
        )
        .expect("Expected a transfer");

        assert_eq!(plan.amount, Money::from_cents(2));
    }

    #[test]
    fn note_records_the_trigger() {
        let with_new = plan_reconciling_transfer(
            Money::from_dollars(55.0),
            Money::from_dollars(40.0),
            "primary",
            "pocket",
            3,
        )
        .unwrap();
        let without_new = plan_reconciling_transfer(
            Money::from_dollars(55.0),
            Money::from_dollars(40.0),
            "primary",
            "pocket",
            0,
        )
        .unwrap();

        assert_eq!(with_new.note, "Synced 3 new transaction(s)");
        assert_eq!(without_new.note, "Balance sync");
    }
}
