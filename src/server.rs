use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::{
        callback::receive_callback,
        handler::{get_vendor_balance, get_wallet_balance, health_check, transfer_balance, AppState},
        pos::{create_transaction, get_transaction},
        websocket::transaction_updates,
    },
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
};

const CALLBACK_BODY_LIMIT: usize = 1 << 20;
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

pub fn create_app(state: AppState, cors_origins: &[String], callback_limiter: RateLimitLayer) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    // Push ingestion from the payment gateway, unauthenticated apart from the path token
    let callbacks = Router::new()
        .route("/callback/receive/:token", post(receive_callback))
        .route("/receive/:token", post(receive_callback))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(callback_limiter, rate_limit_middleware))
                .layer(DefaultBodyLimit::max(CALLBACK_BODY_LIMIT))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    CALLBACK_TIMEOUT,
                )),
        );

    let app = Router::new()
        .route("/health", get(health_check))
        // POS terminal
        .route("/pos/create-transaction", post(create_transaction))
        .route("/pos/transaction/:id", get(get_transaction))
        .route("/pos/ws/transaction", get(transaction_updates))
        // Vendor
        .route("/vendor/balance", get(get_vendor_balance))
        .route("/vendor/transfer-balance", post(transfer_balance))
        // Admin
        .route("/admin/wallet-balance", get(get_wallet_balance))
        .merge(callbacks)
        .layer(CompressionLayer::new())
        .layer(create_cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, Response},
    };
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        auth::{SessionClaims, TokenService},
        ledger::memory::InMemoryLedger,
        notifications::NotificationHub,
        payments::{PaymentGateway, WalletBackend},
        settlement::{ConfirmationReconciler, PayoutExecutor, SettlementBatcher},
        testing::{
            admin_claims, callback_payload, fragment, pos_claims, vendor_address, vendor_claims,
            MockGateway, MockWallet,
        },
    };

    struct TestApp {
        router: Router,
        ledger: InMemoryLedger,
        gateway: Arc<MockGateway>,
        tokens: Arc<TokenService>,
        hub: Arc<NotificationHub>,
    }

    fn test_app() -> TestApp {
        let ledger = InMemoryLedger::new();
        let gateway = Arc::new(MockGateway::default());
        let wallet = Arc::new(MockWallet::accepting_up_to(15));
        let tokens = Arc::new(TokenService::new("session-secret", "callback-secret", 3600));
        let hub = Arc::new(NotificationHub::new());

        let store = Arc::new(ledger.clone());
        let gateway_backend: Arc<dyn PaymentGateway> = gateway.clone();
        let wallet_backend: Arc<dyn WalletBackend> = wallet;

        let state = AppState {
            ledger: store.clone(),
            reconciler: Arc::new(ConfirmationReconciler::new(
                store.clone(),
                Some(gateway_backend.clone()),
                tokens.clone(),
                hub.clone(),
                60,
            )),
            batcher: Arc::new(SettlementBatcher::new(
                store,
                PayoutExecutor::new(Some(wallet_backend.clone()), Some(gateway_backend.clone())),
                15,
                3_000_000,
            )),
            hub: hub.clone(),
            tokens: tokens.clone(),
            gateway: Some(gateway_backend),
            wallet: Some(wallet_backend),
            callback_url: Some("https://pos.example/callback".to_string()),
            shutdown: CancellationToken::new(),
        };

        TestApp {
            router: create_app(state, &[], RateLimitLayer::new(100, 100)),
            ledger,
            gateway,
            tokens,
            hub,
        }
    }

    impl TestApp {
        fn bearer(&self, claims: &SessionClaims) -> String {
            format!("Bearer {}", self.tokens.issue_session(claims))
        }

        async fn send(&self, request: Request<Body>) -> Response<Body> {
            self.router.clone().oneshot(request).await.unwrap()
        }
    }

    async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_services() {
        let app = test_app();
        let response = app
            .send(Request::get("/health").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["postgresql"], true);
        assert_eq!(body["services"]["gateway"], true);
    }

    #[tokio::test]
    async fn test_foreign_pos_is_refused_before_upgrade() {
        let app = test_app();
        let sale = app.ledger.seed_transaction(10, 20, 1_000, 0, Utc::now()).await;
        let uri = format!("/pos/ws/transaction?transaction_id={}", sale.id);

        let response = app
            .send(
                Request::get(&uri)
                    .header(header::AUTHORIZATION, app.bearer(&pos_claims(10, 21)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.hub.subscriber_count(sale.id), 0);

        // the owner gets past authorization and only lacks the upgrade headers
        let response = app
            .send(
                Request::get(&uri)
                    .header(header::AUTHORIZATION, app.bearer(&pos_claims(10, 20)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .send(Request::get(&uri).body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_token_gates_ingestion() {
        let app = test_app();
        let sale = app.ledger.seed_transaction(1, 1, 1_000_000, 0, Utc::now()).await;
        let body = serde_json::to_vec(&callback_payload(
            1_000_000,
            vec![fragment("aa", 1, 1_000_000)],
        ))
        .unwrap();

        let forged = TokenService::new("x", "not-the-callback-secret", 60)
            .mint_callback_token(sale.id)
            .unwrap();
        let response = app
            .send(
                Request::post(format!("/callback/receive/{}", forged))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.ledger.sub_transaction_count(sale.id).await, 0);

        let token = app.tokens.mint_callback_token(sale.id).unwrap();
        let response = app
            .send(
                Request::post(format!("/receive/{}", token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(app.ledger.transaction(sale.id).await.unwrap().accepted);

        let response = app
            .send(
                Request::post(format!("/receive/{}", token))
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_transaction_hands_out_address() {
        let app = test_app();
        let request = serde_json::json!({
            "amount": 1_500_000_000_000i64,
            "description": "Coffee",
            "amount_in_currency": 2.4,
            "currency": "EUR",
            "required_confirmations": 1,
        });

        let response = app
            .send(
                Request::post("/pos/create-transaction")
                    .header(header::AUTHORIZATION, app.bearer(&pos_claims(4, 9)))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(request.to_string()))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let id = body["id"].as_i64().unwrap();
        assert_eq!(body["address"], "8Recv1");

        let stored = app.ledger.transaction(id).await.unwrap();
        assert_eq!(stored.sub_address.as_deref(), Some("8Recv1"));
        assert!(stored.is_owned_by(4, 9));

        let (amount, callback) = app.gateway.receive_requests().remove(0);
        assert_eq!(amount, 1_500_000_000_000);
        let token = callback
            .strip_prefix("https://pos.example/callback/receive/")
            .unwrap();
        assert_eq!(app.tokens.verify_callback_token(token).unwrap(), id);
    }

    #[tokio::test]
    async fn test_create_transaction_rejects_bad_confirmations() {
        let app = test_app();
        let request = serde_json::json!({
            "amount": 1_000,
            "amount_in_currency": 1.0,
            "currency": "EUR",
            "required_confirmations": 11,
        });

        let response = app
            .send(
                Request::post("/pos/create-transaction")
                    .header(header::AUTHORIZATION, app.bearer(&pos_claims(4, 9)))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(request.to_string()))
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.gateway.receive_requests().is_empty());
    }

    #[tokio::test]
    async fn test_second_transfer_request_conflicts() {
        let app = test_app();
        app.ledger.add_vendor(3, Some(&vendor_address(3))).await;
        let sale = app.ledger.seed_transaction(3, 1, 5_000_000, 0, Utc::now()).await;
        app.ledger.set_confirmed(sale.id).await;

        let transfer = || {
            Request::post("/vendor/transfer-balance")
                .header(header::AUTHORIZATION, app.bearer(&vendor_claims(3)))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.send(transfer()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["amount"], 5_000_000);

        let response = app.send(transfer()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["error_code"], "TRANSFER_IN_PROGRESS");
        assert_eq!(app.ledger.transfers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_role_checks() {
        let app = test_app();

        let response = app
            .send(
                Request::get("/vendor/balance")
                    .header(header::AUTHORIZATION, app.bearer(&pos_claims(1, 1)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .send(
                Request::get("/admin/wallet-balance")
                    .header(header::AUTHORIZATION, app.bearer(&admin_claims()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 2_500_000_000_000i64);
        assert_eq!(body["locked"], 500_000_000_000i64);
    }
}
