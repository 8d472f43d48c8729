//! Common test utilities for backdrop integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use tempfile::TempDir;

use backdrop_core::{Account, AccountId, CreditTransaction, Tier};
use backdrop_service::collaborators::memory::{MemoryJobQueue, MemoryObjectStorage};
use backdrop_service::{create_router, AppState, ServiceConfig};
use backdrop_store::{MemoryStore, Store};

/// Session token signing secret.
pub const JWT_SECRET: &str = "test-jwt-secret";

/// Admin API key.
pub const ADMIN_KEY: &str = "test-admin-key";

/// Payment webhook signing secret.
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Reset trigger secret (enforced in production harnesses only).
pub const CRON_SECRET: &str = "test-cron-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<dyn Store>,
    /// Temporary directory for an on-disk store (kept alive for test duration).
    pub _temp_dir: Option<TempDir>,
    /// Uploaded images.
    pub storage: Arc<MemoryObjectStorage>,
    /// Dispatched jobs.
    pub queue: Arc<MemoryJobQueue>,
    /// A test account ID for authenticated requests.
    pub test_account_id: AccountId,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    /// Create a harness that behaves like a production deployment.
    pub fn production() -> Self {
        Self::with_config(ServiceConfig {
            environment: "production".into(),
            ..Self::config()
        })
    }

    /// The configuration every harness starts from.
    pub fn config() -> ServiceConfig {
        ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            environment: "test".into(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            cron_secret: Some(CRON_SECRET.into()),
            payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
            admin_api_key: Some(ADMIN_KEY.into()),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            ..ServiceConfig::default()
        }
    }

    /// Create a harness backed by RocksDB in a fresh temporary directory.
    #[cfg(feature = "rocksdb-backend")]
    pub fn with_rocks() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store =
            backdrop_store::RocksStore::open(temp_dir.path()).expect("Failed to open store");
        let config = ServiceConfig {
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            ..Self::config()
        };

        let mut harness = Self::with_store(Arc::new(store), config);
        harness._temp_dir = Some(temp_dir);
        harness
    }

    /// Create a harness from an explicit configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    fn with_store(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let storage = Arc::new(MemoryObjectStorage::new());
        let queue = Arc::new(MemoryJobQueue::new());

        let state = AppState::new(
            Arc::clone(&store),
            config,
            Arc::clone(&storage) as _,
            Arc::clone(&queue) as _,
        )
        .expect("Failed to build state");
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            _temp_dir: None,
            storage,
            queue,
            test_account_id: AccountId::generate(),
        }
    }

    /// Get the authorization header for the test account.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(&self.test_account_id)
    }

    /// Mint a session token for any account.
    pub fn auth_header_for(account_id: &AccountId) -> String {
        let now = Utc::now().timestamp();
        let claims = json!({
            "sub": account_id.to_string(),
            "aud": "backdrop",
            "iat": now,
            "exp": now + 3600,
        });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token");
        format!("Bearer {token}")
    }

    /// Get a different account's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        Self::auth_header_for(&AccountId::generate())
    }

    /// Open the test account through the user signup route (free tier).
    pub async fn open_account(&self) {
        self.server
            .post("/v1/accounts")
            .add_header("authorization", self.user_auth_header())
            .json(&json!({}))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
    }

    /// Open the test account on `tier` through the admin route.
    pub async fn open_account_on(&self, tier: &str) {
        self.server
            .post("/v1/admin/accounts")
            .add_header("x-admin-key", ADMIN_KEY)
            .json(&json!({
                "account_id": self.test_account_id.to_string(),
                "tier": tier,
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
    }

    /// Insert an account directly with a chosen balance and last reset.
    pub fn seed_account(
        &self,
        tier: Tier,
        balance: i64,
        last_reset: DateTime<Utc>,
    ) -> AccountId {
        let id = AccountId::generate();
        let mut account = Account::new(id, tier, last_reset);
        account.credits_balance = balance;
        let opening = CreditTransaction::monthly_grant(id, balance, balance, tier);
        self.store
            .create_account(&account, Some(&opening))
            .expect("Failed to seed account");
        id
    }

    /// Current balance of an account, read from the store.
    pub fn balance(&self, account_id: &AccountId) -> i64 {
        self.store
            .get_account(account_id)
            .expect("store read")
            .expect("account exists")
            .credits_balance
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A timestamp comfortably more than one calendar month ago.
pub fn two_months_ago() -> DateTime<Utc> {
    Utc::now() - Duration::days(62)
}

/// A multipart batch of `count` PNG images with a prompt.
pub fn image_batch(count: usize, prompt: &str) -> MultipartForm {
    let mut form = MultipartForm::new().add_text("prompt", prompt.to_string());
    for i in 0..count {
        form = form.add_part(
            "images",
            Part::bytes(vec![0x89, b'P', b'N', b'G', i as u8])
                .file_name(format!("photo-{i}.png"))
                .mime_type("image/png"),
        );
    }
    form
}
