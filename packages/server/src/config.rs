use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub worker_count: usize,
    pub job_lease_ms: i64,
    pub idempotency_ttl_secs: u64,
    pub slow_query_threshold_ms: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            worker_count: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_COUNT must be a valid number")?,
            job_lease_ms: env::var("JOB_LEASE_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .context("JOB_LEASE_MS must be a valid number")?,
            idempotency_ttl_secs: env::var("IDEMPOTENCY_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("IDEMPOTENCY_TTL_SECS must be a valid number")?,
            slow_query_threshold_ms: env::var("SLOW_QUERY_THRESHOLD_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("SLOW_QUERY_THRESHOLD_MS must be a valid number")?,
        })
    }
}
