//! Service configuration.

use std::time::Duration;

use backdrop_core::PricingConfig;

/// Default cap on images per submitted batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Limits applied by the job intake saga.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Maximum images accepted in one batch.
    pub max_batch_size: usize,
    /// Bound on each image upload.
    pub upload_timeout: Duration,
    /// Bound on the queue dispatch call.
    pub dispatch_timeout: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            upload_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/backdrop").
    pub data_dir: String,

    /// Deployment environment name (default: "development").
    pub environment: String,

    /// HS256 secret for session JWTs.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT audience (default: "backdrop").
    pub auth_audience: String,

    /// Bearer token the cron trigger must present in production.
    pub cron_secret: Option<String>,

    /// HMAC secret for payment webhooks.
    pub payment_webhook_secret: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Object storage base URL (in-memory storage when unset).
    pub storage_base_url: Option<String>,

    /// Object storage API key.
    pub storage_api_key: Option<String>,

    /// Job queue endpoint (in-memory queue when unset).
    pub queue_url: Option<String>,

    /// Job queue API key.
    pub queue_api_key: Option<String>,

    /// Intake limits and collaborator timeouts.
    pub intake: IntakeConfig,

    /// Accounts reset concurrently by one reset run.
    pub reset_concurrency: usize,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Volume pricing schedule.
    pub pricing: PricingConfig,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            cron_secret: std::env::var("CRON_SECRET").ok(),
            payment_webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            storage_base_url: std::env::var("STORAGE_BASE_URL").ok(),
            storage_api_key: std::env::var("STORAGE_API_KEY").ok(),
            queue_url: std::env::var("QUEUE_URL").ok(),
            queue_api_key: std::env::var("QUEUE_API_KEY").ok(),
            intake: IntakeConfig {
                max_batch_size: env_parse("MAX_BATCH_SIZE")
                    .unwrap_or(defaults.intake.max_batch_size),
                upload_timeout: env_parse("UPLOAD_TIMEOUT_SECONDS")
                    .map_or(defaults.intake.upload_timeout, Duration::from_secs),
                dispatch_timeout: env_parse("DISPATCH_TIMEOUT_SECONDS")
                    .map_or(defaults.intake.dispatch_timeout, Duration::from_secs),
            },
            reset_concurrency: env_parse("RESET_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.reset_concurrency),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            pricing: defaults.pricing,
        }
    }

    /// Whether this is a production-like deployment.
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "production" | "prod"
        )
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/backdrop".into(),
            environment: "development".into(),
            auth_jwt_secret: None,
            auth_audience: "backdrop".into(),
            cron_secret: None,
            payment_webhook_secret: None,
            admin_api_key: None,
            storage_base_url: None,
            storage_api_key: None,
            queue_url: None,
            queue_api_key: None,
            intake: IntakeConfig::default(),
            reset_concurrency: 8,
            cors_origins: vec!["*".into()],
            max_body_bytes: 50 * 1024 * 1024, // 50MB of images
            request_timeout_seconds: 120,
            pricing: PricingConfig::default(),
        }
    }
}
