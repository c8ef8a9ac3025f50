//! The background loop that drives scheduled reconciliation.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{task::JoinHandle, time::MissedTickBehavior};

use super::SyncEngine;

/// The default spacing between scheduler ticks.
const DEFAULT_TICK_SECONDS: u64 = 30;

/// Runs [SyncEngine::reconcile_all] on a fixed period.
///
/// The tick period is the lower bound on how often any account is polled;
/// per-account spacing beyond that is the engine's rate gate. Ticks that
/// land while a reconciliation pass is still running are skipped rather than
/// queued, so a slow provider cannot build a backlog of passes.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    tick: std::time::Duration,
    started: AtomicBool,
}

impl Scheduler {
    /// A scheduler that ticks every 30 seconds.
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self::with_tick(engine, std::time::Duration::from_secs(DEFAULT_TICK_SECONDS))
    }

    /// A scheduler with a custom tick period.
    pub fn with_tick(engine: Arc<SyncEngine>, tick: std::time::Duration) -> Self {
        Self {
            engine,
            tick,
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the scheduler loop onto the tokio runtime.
    ///
    /// The loop runs until the returned handle is aborted or the runtime
    /// shuts down. Calling start a second time returns `None` instead of
    /// spawning a competing loop.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("the sync scheduler has already been started");
            return None;
        }

        let engine = Arc::clone(&self.engine);
        let tick = self.tick;

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!("sync scheduler started, ticking every {tick:?}");

            loop {
                interval.tick().await;

                match engine.reconcile_all().await {
                    Ok(outcomes) => {
                        let synced = outcomes.iter().filter(|outcome| !outcome.skipped).count();

                        if synced > 0 {
                            tracing::debug!("reconciled {synced} account(s) this tick");
                        }
                    }
                    Err(error) => {
                        tracing::error!("scheduler tick failed: {error}");
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod scheduler_tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use rusqlite::Connection;

    use crate::{
        EngineConfig, Error, LoggingCacheInvalidator, Money, SyncEngine,
        db::initialize,
        ledger::{LedgerClient, Subaccount},
        link::{Provider, attach_pocket, create_link},
        provider::{FetchedTransaction, ProviderAdapter, SyncWindow},
    };

    use super::Scheduler;

    struct NullLedger;

    #[async_trait::async_trait]
    impl LedgerClient for NullLedger {
        async fn list_subaccounts(&self) -> Result<Vec<Subaccount>, Error> {
            Ok(vec![Subaccount {
                id: "pocket-1".to_owned(),
                name: "Card Pocket".to_owned(),
                balance: Money::ZERO,
            }])
        }

        async fn transfer(&self, _: &str, _: &str, _: Money, _: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn create_pocket(&self, _: &str) -> Result<String, Error> {
            Ok("pocket-1".to_owned())
        }

        async fn delete_pocket(&self, _: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    struct CountingAdapter(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ProviderAdapter for CountingAdapter {
        async fn fetch_balance(&self, _: &str) -> Result<Money, Error> {
            Ok(Money::ZERO)
        }

        async fn fetch_transactions(
            &self,
            _: &str,
            _: &SyncWindow,
        ) -> Result<Vec<FetchedTransaction>, Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn get_test_engine(fetches: Arc<AtomicUsize>) -> SyncEngine {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        create_link("m-1", "Card", Provider::MerchantAggregator, None, &connection).unwrap();
        attach_pocket("m-1", "pocket-1", &connection).unwrap();

        SyncEngine::new(
            Arc::new(Mutex::new(connection)),
            Box::new(NullLedger),
            Box::new(LoggingCacheInvalidator),
            EngineConfig::new("primary"),
        )
        .with_adapter(
            Provider::MerchantAggregator,
            Box::new(CountingAdapter(fetches)),
        )
    }

    #[tokio::test]
    async fn scheduler_starts_at_most_once() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Arc::new(get_test_engine(fetches)));

        let first = scheduler.start();
        let second = scheduler.start();

        assert!(first.is_some());
        assert!(second.is_none());

        if let Some(handle) = first {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn ticks_drive_reconciliation() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::with_tick(
            Arc::new(get_test_engine(fetches.clone())),
            std::time::Duration::from_millis(10),
        );

        let handle = scheduler.start().expect("Could not start the scheduler");
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        handle.abort();

        // The first tick fires immediately; several more fit in the window.
        assert!(fetches.load(Ordering::SeqCst) >= 2);
    }
}
