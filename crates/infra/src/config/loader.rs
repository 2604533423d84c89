//! Configuration loader
//!
//! Loads application configuration from environment variables. Every setting
//! has a documented default except the broker credentials, which must always
//! be supplied.
//!
//! ## Environment Variables
//! - `DOCFLOW_HTTP_ADDR`: API listener address (default `127.0.0.1:8080`)
//! - `DOCFLOW_HTTP_REQUEST_TIMEOUT_SECS`: per-request ceiling (default `30`)
//! - `DOCFLOW_HTTP_MAX_UPLOAD_BYTES`: upload size limit (default 50 MiB)
//! - `DOCFLOW_DB_PATH`: SQLite file path (default `docflow.db`)
//! - `DOCFLOW_DB_POOL_SIZE`: connection pool size (default `8`)
//! - `DOCFLOW_BLOB_ROOT`: blob tree root (default `./blobs`)
//! - `DOCFLOW_BROKER_HOST` / `DOCFLOW_BROKER_PORT`: broker endpoint
//!   (default `localhost:5672`)
//! - `DOCFLOW_BROKER_USERNAME` / `DOCFLOW_BROKER_PASSWORD`: required
//! - `DOCFLOW_BROKER_VHOST`: broker vhost (default `/`)
//! - `DOCFLOW_CLASSIFIER_URL`: classifier base URL (default
//!   `http://localhost:8000`)
//! - `DOCFLOW_CLASSIFIER_TIMEOUT_SECS`: per-call timeout (default `300`)
//! - `DOCFLOW_CLASSIFIER_FAILURE_THRESHOLD`: breaker threshold (default `5`)
//! - `DOCFLOW_CLASSIFIER_OPEN_DURATION_MS`: breaker dwell (default `30000`)
//! - `DOCFLOW_CLASSIFIER_HALF_OPEN_MAX_ATTEMPTS`: probe cap (default `1`)
//! - `DOCFLOW_DLQ_ENABLED`: run the reprocessor (default `true`)
//! - `DOCFLOW_DLQ_MAX_RETRY_CYCLES`: retry budget (default `5`)
//! - `DOCFLOW_DLQ_BASE_DELAY_MS` / `DOCFLOW_DLQ_MAX_DELAY_MS`: backoff
//!   bounds (defaults `1000` / `60000`)
//! - `DOCFLOW_METRICS_ADDR`: health/metrics listener (default
//!   `127.0.0.1:9090`)

use std::fmt::Display;
use std::str::FromStr;

use docflow_domain::{
    AppConfig, BlobStoreConfig, BrokerConfig, ClassifierConfig, DatabaseConfig, DlqConfig,
    HttpConfig, MetricsConfig, PipelineError, Result,
};

/// Load and validate configuration from environment variables.
pub fn load() -> Result<AppConfig> {
    let http = HttpConfig {
        bind_addr: env_or("DOCFLOW_HTTP_ADDR", HttpConfig::default().bind_addr),
        request_timeout_secs: env_parse(
            "DOCFLOW_HTTP_REQUEST_TIMEOUT_SECS",
            HttpConfig::default().request_timeout_secs,
        )?,
        max_upload_bytes: env_parse(
            "DOCFLOW_HTTP_MAX_UPLOAD_BYTES",
            HttpConfig::default().max_upload_bytes,
        )?,
    };

    let database = DatabaseConfig {
        path: env_or("DOCFLOW_DB_PATH", DatabaseConfig::default().path),
        pool_size: env_parse("DOCFLOW_DB_POOL_SIZE", DatabaseConfig::default().pool_size)?,
    };

    let blob = BlobStoreConfig { root: env_or("DOCFLOW_BLOB_ROOT", BlobStoreConfig::default().root) };

    let broker = BrokerConfig {
        host: env_or("DOCFLOW_BROKER_HOST", "localhost".to_string()),
        port: env_parse("DOCFLOW_BROKER_PORT", 5672)?,
        username: env_required("DOCFLOW_BROKER_USERNAME")?,
        password: env_required("DOCFLOW_BROKER_PASSWORD")?,
        vhost: env_or("DOCFLOW_BROKER_VHOST", "/".to_string()),
    };

    let classifier_defaults = ClassifierConfig::default();
    let classifier = ClassifierConfig {
        base_url: env_or("DOCFLOW_CLASSIFIER_URL", classifier_defaults.base_url),
        timeout_secs: env_parse("DOCFLOW_CLASSIFIER_TIMEOUT_SECS", classifier_defaults.timeout_secs)?,
        failure_threshold: env_parse(
            "DOCFLOW_CLASSIFIER_FAILURE_THRESHOLD",
            classifier_defaults.failure_threshold,
        )?,
        open_duration_ms: env_parse(
            "DOCFLOW_CLASSIFIER_OPEN_DURATION_MS",
            classifier_defaults.open_duration_ms,
        )?,
        half_open_max_attempts: env_parse(
            "DOCFLOW_CLASSIFIER_HALF_OPEN_MAX_ATTEMPTS",
            classifier_defaults.half_open_max_attempts,
        )?,
    };

    let dlq_defaults = DlqConfig::default();
    let dlq = DlqConfig {
        enabled: env_bool("DOCFLOW_DLQ_ENABLED", dlq_defaults.enabled),
        max_retry_cycles: env_parse("DOCFLOW_DLQ_MAX_RETRY_CYCLES", dlq_defaults.max_retry_cycles)?,
        base_delay_ms: env_parse("DOCFLOW_DLQ_BASE_DELAY_MS", dlq_defaults.base_delay_ms)?,
        max_delay_ms: env_parse("DOCFLOW_DLQ_MAX_DELAY_MS", dlq_defaults.max_delay_ms)?,
    };

    let metrics =
        MetricsConfig { bind_addr: env_or("DOCFLOW_METRICS_ADDR", MetricsConfig::default().bind_addr) };

    let config = AppConfig { http, database, blob, broker, classifier, dlq, metrics };
    config.validate()?;

    tracing::info!("configuration loaded from environment");
    Ok(config)
}

/// Get a required environment variable.
fn env_required(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| PipelineError::validation(key, "required environment variable is not set"))
}

/// Get an environment variable, falling back to a default.
fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

/// Parse an environment variable, falling back to a default when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| PipelineError::validation(key, format!("invalid value: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean from an environment variable.
///
/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use once_cell::sync::Lazy;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn clear_docflow_vars() {
        let keys: Vec<String> = std::env::vars()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with("DOCFLOW_"))
            .collect();
        for key in keys {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn loads_defaults_with_credentials_present() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_docflow_vars();
        std::env::set_var("DOCFLOW_BROKER_USERNAME", "docflow");
        std::env::set_var("DOCFLOW_BROKER_PASSWORD", "secret");

        let config = load().expect("defaults load");
        assert_eq!(config.http.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.classifier.timeout_secs, 300);
        assert_eq!(config.dlq.max_retry_cycles, 5);
        assert!(config.dlq.enabled);
        assert_eq!(config.broker.username, "docflow");

        clear_docflow_vars();
    }

    #[test]
    fn missing_credentials_fail_loading() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_docflow_vars();

        let err = load().expect_err("credentials are required");
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn invalid_numbers_are_validation_errors() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_docflow_vars();
        std::env::set_var("DOCFLOW_BROKER_USERNAME", "docflow");
        std::env::set_var("DOCFLOW_BROKER_PASSWORD", "secret");
        std::env::set_var("DOCFLOW_DB_POOL_SIZE", "not-a-number");

        let err = load().expect_err("bad pool size rejected");
        assert!(matches!(err, PipelineError::Validation(_)));

        clear_docflow_vars();
    }

    #[test]
    fn dlq_invariants_are_enforced_at_load() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_docflow_vars();
        std::env::set_var("DOCFLOW_BROKER_USERNAME", "docflow");
        std::env::set_var("DOCFLOW_BROKER_PASSWORD", "secret");
        std::env::set_var("DOCFLOW_DLQ_BASE_DELAY_MS", "0");

        let err = load().expect_err("zero base delay rejected");
        assert!(matches!(err, PipelineError::Validation(_)));

        clear_docflow_vars();
    }

    #[test]
    fn env_bool_parses_common_forms() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        std::env::set_var("DOCFLOW_TEST_BOOL", "on");
        assert!(env_bool("DOCFLOW_TEST_BOOL", false));
        std::env::set_var("DOCFLOW_TEST_BOOL", "no");
        assert!(!env_bool("DOCFLOW_TEST_BOOL", true));
        std::env::remove_var("DOCFLOW_TEST_BOOL");
        assert!(env_bool("DOCFLOW_TEST_BOOL", true));
    }
}
