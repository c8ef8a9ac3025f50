use std::{
    env,
    fs::OpenOptions,
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::Parser;
use rusqlite::Connection;
use tokio::signal;
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use pocketsync::{
    BankClient, CrewLedgerClient, EngineConfig, LedgerClient, LoggingCacheInvalidator,
    MerchantClient, Provider, Scheduler, SyncEngine, initialize_db, store_credential,
};

/// The background daemon that keeps tracking pockets in sync with external
/// accounts.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// URL of the banking GraphQL endpoint that holds the pockets.
    #[arg(long)]
    ledger_url: String,

    /// Base URL of the merchant aggregator REST API.
    #[arg(long)]
    merchant_url: Option<String>,

    /// Base URL of the bank aggregator REST API.
    #[arg(long)]
    bank_url: Option<String>,

    /// Seconds between scheduler ticks.
    #[arg(long, default_value_t = 30)]
    sync_period_secs: u64,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();

    let bearer_token = env::var("CREW_BEARER_TOKEN")
        .expect("The environment variable 'CREW_BEARER_TOKEN' must be set");

    let conn = Connection::open(&args.db_path).expect("Could not open the database");
    initialize_db(&conn).expect("Could not initialize the database");
    let conn = Arc::new(Mutex::new(conn));

    let ledger = CrewLedgerClient::new(&args.ledger_url, &bearer_token);
    let primary_pocket_id = primary_pocket_id(&ledger).await;

    let mut engine = SyncEngine::new(
        conn.clone(),
        Box::new(ledger),
        Box::new(LoggingCacheInvalidator),
        EngineConfig::new(&primary_pocket_id),
    );

    if let Some(merchant_url) = &args.merchant_url {
        let api_key = env::var("MERCHANT_API_KEY")
            .expect("The environment variable 'MERCHANT_API_KEY' must be set");
        engine = engine.with_adapter(
            Provider::MerchantAggregator,
            Box::new(MerchantClient::new(merchant_url, &api_key)),
        );
    }

    if let Some(bank_url) = &args.bank_url {
        let access_token = env::var("BANK_ACCESS_TOKEN")
            .expect("The environment variable 'BANK_ACCESS_TOKEN' must be set");

        {
            let conn = conn.lock().expect("Could not acquire the database lock");
            store_credential(Provider::BankAggregator, &access_token, &conn)
                .expect("Could not store the bank credential");
        }

        engine = engine.with_adapter(
            Provider::BankAggregator,
            Box::new(BankClient::new(bank_url, &access_token)),
        );
    }

    let scheduler = Scheduler::with_tick(
        Arc::new(engine),
        Duration::from_secs(args.sync_period_secs),
    );
    let handle = scheduler.start().expect("Could not start the scheduler");

    shutdown_signal().await;
    handle.abort();
    tracing::info!("sync daemon stopped");
}

/// Find the pocket that reconciliation transfers draw from.
///
/// The checking pocket is the one the banking app displays as "Checking"; if
/// none matches, the first pocket is used.
async fn primary_pocket_id(ledger: &CrewLedgerClient) -> String {
    let subaccounts = ledger
        .list_subaccounts()
        .await
        .expect("Could not list subaccounts from the ledger");

    subaccounts
        .iter()
        .find(|subaccount| subaccount.name == "Checking")
        .or_else(|| subaccounts.first())
        .map(|subaccount| subaccount.id.clone())
        .expect("The ledger has no subaccounts")
}

fn setup_logging() {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(filter::LevelFilter::INFO)
                .and_then(debug_log)
                .with_filter(filter::LevelFilter::DEBUG),
        )
        .init();
}

/// Wait for either the ctrl+c or terminate signal, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
        },
    }
}
