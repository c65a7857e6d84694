//! Fund Transfer - demo runner
//!
//! Wires both transfer paths from `config/<env>.yaml` and walks through the
//! reference scenario on each:
//!
//! ```text
//! A=1000, B=0
//! T1: A → B 500      → A=500, B=500, T1 COMPLETED
//! T1 again           → no change
//! T2: A → B 1500     → InsufficientFunds, T2 FAILED
//! ```
//!
//! With `postgres_url` set every store is PostgreSQL; otherwise in memory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{info, warn};

use fund_transfer::account::{
    AccountCommandHandler, AccountService, CommandChannel, EventBus, EventLog, InMemoryEventLog,
    PgEventLog, command_channel, serve_commands,
};
use fund_transfer::balance::{
    BalanceProvider, BalanceStore, EventSourcedBalances, InMemoryBalanceStore,
    MaterializedBalances, PgBalanceStore,
};
use fund_transfer::config::{AppConfig, env_from_args};
use fund_transfer::core_types::{AccountId, BalanceAccountId, TransactionId};
use fund_transfer::db::{Database, init_schema};
use fund_transfer::ledger::{InMemoryTransactionLedger, PgTransactionLedger, TransactionLedger};
use fund_transfer::logging::init_logging;
use fund_transfer::saga::{
    InMemorySagaStore, PgSagaStore, SagaManager, SagaRecoveryWorker, SagaState, SagaStats,
    SagaStore,
};
use fund_transfer::transfer::{
    LoggingNotifier, TransferError, TransferEvents, TransferOrchestrator,
    spawn_lifecycle_listener,
};

const SAGA_WAIT: Duration = Duration::from_secs(5);

struct Stores {
    event_log: Arc<dyn EventLog>,
    sagas: Arc<dyn SagaStore>,
    ledger: Arc<dyn TransactionLedger>,
    balances: Arc<dyn BalanceStore>,
}

impl Stores {
    async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        match &config.postgres_url {
            Some(url) => {
                let db = Database::connect(url)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.health_check().await?;
                init_schema(db.pool()).await?;
                let pool = db.pool().clone();
                info!("Using PostgreSQL stores");
                Ok(Self {
                    event_log: Arc::new(PgEventLog::new(pool.clone())),
                    sagas: Arc::new(PgSagaStore::new(pool.clone())),
                    ledger: Arc::new(PgTransactionLedger::new(pool.clone())),
                    balances: Arc::new(PgBalanceStore::new(pool)),
                })
            }
            None => {
                info!("Using in-memory stores");
                Ok(Self {
                    event_log: Arc::new(InMemoryEventLog::new()),
                    sagas: Arc::new(InMemorySagaStore::new()),
                    ledger: Arc::new(InMemoryTransactionLedger::new()),
                    balances: Arc::new(InMemoryBalanceStore::new()),
                })
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = env_from_args(std::env::args());
    let config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        lock_mode = ?config.transfer.lock_mode,
        "Starting fund_transfer"
    );

    let stores = Stores::from_config(&config).await?;

    // ---- Event-sourced path ----
    let handler = Arc::new(AccountCommandHandler::new(
        stores.event_log.clone(),
        EventBus::new(),
    ));
    let (sender, receiver) = command_channel(config.saga.command_buffer);
    tokio::spawn(serve_commands(handler.clone(), receiver));
    let commands: Arc<dyn CommandChannel> = Arc::new(sender);

    let stats = Arc::new(SagaStats::new());
    let manager = SagaManager::new(
        stores.sagas.clone(),
        commands.clone(),
        handler.bus(),
        stats.clone(),
    )
    .with_compensation_retry(config.saga.retry_compensation);
    let worker = SagaRecoveryWorker::new(
        stores.sagas.clone(),
        manager.handle(),
        config.saga.worker_config(),
    );
    manager.spawn();
    tokio::spawn(async move {
        worker.run().await;
    });

    run_event_sourced(
        &AccountService::new(commands),
        stores.sagas.as_ref(),
        &EventSourcedBalances::new(stores.event_log.clone()),
    )
    .await?;

    // ---- Direct path ----
    let events = TransferEvents::default();
    let _listener = spawn_lifecycle_listener(&events);
    let orchestrator = TransferOrchestrator::new(
        stores.ledger.clone(),
        stores.balances.clone(),
        Arc::new(LoggingNotifier::new(Duration::from_millis(
            config.transfer.notification_delay_ms,
        ))),
    )
    .with_lock_mode(config.transfer.lock_mode)
    .with_retry_policy(config.transfer.retry)
    .with_events(events);

    run_direct(&orchestrator, &stores).await?;

    info!("{}", stats.snapshot());
    Ok(())
}

async fn wait_for_saga(sagas: &dyn SagaStore, tx: &TransactionId) -> anyhow::Result<SagaState> {
    let deadline = tokio::time::Instant::now() + SAGA_WAIT;
    while tokio::time::Instant::now() < deadline {
        if let Some(record) = sagas.get(tx).await? {
            if record.state.is_terminal() {
                return Ok(record.state);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("saga {} did not finish within {:?}", tx, SAGA_WAIT)
}

async fn log_balances<P>(label: &str, provider: &P, accounts: &[(&str, P::AccountKey)])
where
    P: BalanceProvider,
{
    for (name, key) in accounts {
        match provider.balance(key).await {
            Ok(balance) => info!(
                step = label,
                account = *name,
                balance = %balance.unwrap_or_default(),
                "Balance"
            ),
            Err(e) => warn!(step = label, account = *name, error = %e, "Balance unavailable"),
        }
    }
}

async fn run_event_sourced(
    service: &AccountService,
    sagas: &dyn SagaStore,
    balances: &EventSourcedBalances,
) -> anyhow::Result<()> {
    info!("=== Event-sourced transfers ===");

    let a = service.create_account(Decimal::from(1000)).await?;
    let b = service.create_account(Decimal::ZERO).await?;

    let t1 = service.transfer(&a, &b, Decimal::from(500)).await?;
    let state = wait_for_saga(sagas, &t1).await?;
    info!(transaction_id = %t1, state = %state, "Transfer saga finished");

    // Redelivery of the same debit is acknowledged without effect
    let again = service
        .transfer_with_id(&t1, &a, &b, Decimal::from(500))
        .await?;
    info!(transaction_id = %t1, applied = again.applied, "Debit resubmitted");
    log_balances("after T1", balances, &[("A", a.clone()), ("B", b.clone())]).await;

    match service.transfer(&a, &b, Decimal::from(1500)).await {
        Ok(tx) => warn!(transaction_id = %tx, "Overdraft unexpectedly accepted"),
        Err(e) => info!(code = e.code(), error = %e, "Overdraft rejected"),
    }

    // Credit to an account that does not exist: debit is compensated
    let ghost = AccountId::generate();
    let t3 = service.transfer(&a, &ghost, Decimal::from(200)).await?;
    let state = wait_for_saga(sagas, &t3).await?;
    info!(transaction_id = %t3, state = %state, "Transfer saga finished");
    log_balances("after compensation", balances, &[("A", a), ("B", b)]).await;

    Ok(())
}

async fn run_direct(orchestrator: &TransferOrchestrator, stores: &Stores) -> anyhow::Result<()> {
    info!("=== Direct transfers ({:?}) ===", orchestrator.lock_mode());

    // Unique row ids so reruns against PostgreSQL do not collide
    let base: BalanceAccountId = Utc::now().timestamp_millis() * 10;
    let (a, b, c, d) = (base + 1, base + 2, base + 3, base + 4);
    stores.balances.create(a, Decimal::from(1000)).await?;
    stores.balances.create(b, Decimal::ZERO).await?;
    stores.balances.create(c, Decimal::from(1000)).await?;
    stores.balances.create(d, Decimal::ZERO).await?;
    let balances = MaterializedBalances::new(stores.balances.clone());

    let t1 = TransactionId::generate();
    orchestrator.transfer(&t1, a, b, Decimal::from(500)).await?;
    let replay = orchestrator.transfer(&t1, a, b, Decimal::from(500)).await?;
    info!(transaction_id = %t1, replayed = replay.replayed, "Transfer resubmitted");

    let t2 = TransactionId::generate();
    match orchestrator.transfer(&t2, a, b, Decimal::from(1500)).await {
        Err(TransferError::InsufficientFunds { .. }) => {}
        other => warn!(result = ?other, "Unexpected overdraft outcome"),
    }
    for tx in [&t1, &t2] {
        if let Some(record) = stores.ledger.get(tx).await? {
            info!(transaction_id = %tx, status = %record.status, "Ledger");
        }
    }
    log_balances("after T2", &balances, &[("A", a), ("B", b)]).await;

    // Two concurrent 700 transfers from 1000: exactly one succeeds
    let attempts = [TransactionId::generate(), TransactionId::generate()];
    let results = join_all(
        attempts
            .iter()
            .map(|tx| orchestrator.transfer(tx, c, d, Decimal::from(700))),
    )
    .await;
    for (tx, result) in attempts.iter().zip(results) {
        match result {
            Ok(_) => info!(transaction_id = %tx, "Concurrent transfer succeeded"),
            Err(e) => info!(transaction_id = %tx, code = e.code(), "Concurrent transfer failed"),
        }
    }
    log_balances("after concurrent", &balances, &[("C", c), ("D", d)]).await;

    Ok(())
}
