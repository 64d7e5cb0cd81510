use std::{sync::Arc, time::Duration};

use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    api::AppState,
    auth::TokenService,
    config::Config,
    error::{AppResult, BackendError},
    ledger::{repository::LedgerRepository, store::LedgerStore},
    notifications::NotificationHub,
    payments::{
        models::WalletBalance, GatewayClient, PaymentGateway, WalletBackend, WalletRpcClient,
    },
    settlement::{
        spawn_periodic, ConfirmationReconciler, PayoutExecutor, SettlementBatcher, SweepSchedule,
    },
};

/// Atomic units per coin
const ATOMIC_SCALE: u32 = 12;
const DISPLAY_SCALE: u32 = 6;

pub struct Application {
    pub state: AppState,
    /// Scheduler tasks; they finish once the shutdown token is cancelled
    pub workers: Vec<JoinHandle<()>>,
}

pub async fn initialize_app_state(
    config: &Config,
    shutdown: CancellationToken,
) -> AppResult<Application> {
    info!("Initializing application components ...");

    let pool = initialize_database(config).await?;
    let ledger: Arc<dyn LedgerStore> = Arc::new(LedgerRepository::new(pool));

    let gateway = initialize_gateway(config);
    let wallet = initialize_wallet(config);
    log_backend_status(config, gateway.as_deref(), wallet.as_deref()).await;

    let tokens = Arc::new(TokenService::new(
        &config.jwt_secret,
        &config.jwt_callback_secret,
        config.callback_token_ttl_secs,
    ));
    let hub = Arc::new(NotificationHub::new());

    let reconciler = Arc::new(ConfirmationReconciler::new(
        ledger.clone(),
        gateway.clone(),
        tokens.clone(),
        hub.clone(),
        config.reconcile_grace_secs,
    ));
    info!("✅ Confirmation reconciler initialized");

    let batcher = Arc::new(SettlementBatcher::new(
        ledger.clone(),
        PayoutExecutor::new(wallet.clone(), gateway.clone()),
        config.settlement_max_batch,
        config.min_payout_amount,
    ));
    info!(
        "✅ Settlement batcher initialized (max batch {}, minimum payout {} XMR)",
        config.settlement_max_batch,
        format_xmr(config.min_payout_amount)
    );

    let workers = vec![
        spawn_periodic(
            reconciler.clone(),
            SweepSchedule::new(config.reconcile_interval_secs, config.reconcile_deadline_secs),
            shutdown.clone(),
        ),
        spawn_periodic(
            batcher.clone(),
            SweepSchedule::new(config.settlement_interval_secs, config.settlement_deadline_secs),
            shutdown.clone(),
        ),
    ];

    let state = AppState {
        ledger,
        reconciler,
        batcher,
        hub,
        tokens,
        gateway,
        wallet,
        callback_url: config.gateway_callback_url.clone(),
        shutdown,
    };

    Ok(Application { state, workers })
}

async fn initialize_database(config: &Config) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    info!(
        "✓ Database pool configured: {} max connections",
        config.db_max_connections
    );

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}

fn initialize_gateway(config: &Config) -> Option<Arc<dyn PaymentGateway>> {
    let Some(base_url) = config.gateway_base_url.as_deref() else {
        warn!("⚠️  GATEWAY_BASE_URL not set - receive addresses and gateway payouts disabled");
        return None;
    };

    match GatewayClient::new(base_url) {
        Ok(client) => {
            info!("✅ Payment gateway client registered: {}", base_url);
            Some(Arc::new(client))
        }
        Err(e) => {
            error!("Failed to build payment gateway client: {}", e);
            None
        }
    }
}

fn initialize_wallet(config: &Config) -> Option<Arc<dyn WalletBackend>> {
    let Some(endpoint) = config.wallet_rpc_endpoint.as_deref() else {
        warn!("⚠️  WALLET_RPC_ENDPOINT not set - payouts go through the gateway only");
        return None;
    };

    match WalletRpcClient::new(
        endpoint,
        config.wallet_rpc_username.clone(),
        config.wallet_rpc_password.clone(),
    ) {
        Ok(client) => {
            info!("✅ Wallet RPC client registered: {}", endpoint);
            Some(Arc::new(client))
        }
        Err(e) => {
            error!("Failed to build wallet RPC client: {}", e);
            None
        }
    }
}

/// Startup probe of both backends; failures are logged, never fatal
async fn log_backend_status(
    config: &Config,
    gateway: Option<&dyn PaymentGateway>,
    wallet: Option<&dyn WalletBackend>,
) {
    if let Some(wallet) = wallet {
        let wallet_file = config
            .wallet_name
            .as_deref()
            .map(|name| (name, config.wallet_password.as_deref()));
        match ensure_wallet_ready(wallet, wallet_file).await {
            Ok(balance) => info!(
                "💰 Wallet balance: {} XMR ({} unlocked)",
                format_xmr(balance.balance),
                format_xmr(balance.unlocked_balance)
            ),
            Err(e) => warn!("Wallet RPC not reachable at startup: {}", e),
        }
    }

    if let Some(gateway) = gateway {
        match gateway.health().await {
            Ok(health) if health.is_healthy() => info!("✅ Payment gateway healthy"),
            Ok(health) => warn!(
                "Payment gateway degraded (status {}, walletrpc={}, postgresql={})",
                health.status, health.services.walletrpc, health.services.postgresql
            ),
            Err(e) => warn!("Payment gateway not reachable at startup: {}", e),
        }
    }
}

/// Wallet balance, opening the configured wallet file first if the RPC has none open
async fn ensure_wallet_ready(
    wallet: &dyn WalletBackend,
    wallet_file: Option<(&str, Option<&str>)>,
) -> Result<WalletBalance, BackendError> {
    match wallet.get_balance().await {
        Err(e) if e.is_wallet_not_open() => {
            let Some((filename, password)) = wallet_file else {
                warn!("⚠️  Wallet RPC has no wallet open and WALLET_NAME is not set");
                return Err(e);
            };
            wallet.open_wallet(filename, password).await?;
            info!("🔓 Wallet {} opened", filename);
            wallet.get_balance().await
        }
        result => result,
    }
}

/// Atomic units as a coin amount with 6 decimals
pub fn format_xmr(atomic: i64) -> String {
    Decimal::new(atomic, ATOMIC_SCALE)
        .round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::MidpointNearestEven)
        .to_string()
}
