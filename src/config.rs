//! Configuration loader: merges .env, config.toml and env vars.

use common::config::AppConfig;
use common::{Error, NetworkQuality};
use std::path::Path;

fn parse_lines(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn parse_network_quality(raw: &str) -> Result<Option<NetworkQuality>, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "auto" | "adaptive" => Ok(None),
        "wifi" => Ok(Some(NetworkQuality::Wifi)),
        "cellular_good" | "good" => Ok(Some(NetworkQuality::CellularGood)),
        "cellular_poor" | "poor" => Ok(Some(NetworkQuality::CellularPoor)),
        "offline" => Ok(Some(NetworkQuality::Offline)),
        _ => Err(Error::Config(
            "LINEWATCH_NETWORK_QUALITY must be one of: auto, wifi, cellular_good, cellular_poor, offline"
                .into(),
        )),
    }
}

fn validate_config(config: &AppConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.detro.base_url.trim().is_empty() {
        issues.push("detro.base_url must not be empty".into());
    }
    if config.rio.base_url.trim().is_empty() {
        issues.push("rio.base_url must not be empty".into());
    }
    if config.rio.snapshot_url.trim().is_empty() {
        issues.push("rio.snapshot_url must not be empty".into());
    }
    if config.detro.timeout_secs == 0 {
        issues.push("detro.timeout_secs must be > 0".into());
    }
    if config.rio.timeout_secs == 0 || config.rio.snapshot_timeout_secs == 0 {
        issues.push("rio timeouts must be > 0".into());
    }

    if config.cache.fresh_window_secs == 0 {
        issues.push("cache.fresh_window_secs must be > 0".into());
    }
    if config.cache.stale_window_secs < config.cache.fresh_window_secs {
        issues.push("cache.stale_window_secs must be >= cache.fresh_window_secs".into());
    }

    if config.retry.max_attempts == 0 {
        issues.push("retry.max_attempts must be > 0".into());
    }

    let polling = &config.polling;
    if polling.wifi_interval_secs == 0
        || polling.cellular_good_interval_secs == 0
        || polling.cellular_poor_interval_secs == 0
        || polling.offline_interval_secs == 0
    {
        issues.push("polling intervals must all be > 0".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load configuration from .env, optional config.toml, and the environment.
pub fn load_config() -> Result<AppConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = AppConfig::default();

    // 3. Try loading config.toml if it exists.
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 4. Override with environment variables (highest priority).
    if let Ok(raw) = std::env::var("LINEWATCH_LINES") {
        config.lines = parse_lines(&raw);
    }
    if let Ok(url) = std::env::var("DETRO_BASE_URL") {
        config.detro.base_url = url;
    }
    if let Ok(url) = std::env::var("RIO_PROXY_URL") {
        config.rio.base_url = url;
    }
    if let Ok(url) = std::env::var("RIO_SNAPSHOT_URL") {
        config.rio.snapshot_url = url;
    }
    if let Ok(dir) = std::env::var("LINEWATCH_CACHE_DIR") {
        config.cache.dir = dir;
    }
    if let Ok(raw) = std::env::var("LINEWATCH_NETWORK_QUALITY") {
        config.polling.network_quality = parse_network_quality(&raw)?;
    }
    if let Ok(path) = std::env::var("LINEWATCH_CATALOG_PATH") {
        config.catalog.path = Some(path);
    }

    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_interval_and_short_stale_window() {
        let mut config = AppConfig::default();
        config.polling.offline_interval_secs = 0;
        config.cache.fresh_window_secs = 60;
        config.cache.stale_window_secs = 30;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("polling intervals"));
        assert!(err.contains("stale_window_secs"));
    }

    #[test]
    fn test_env_value_parsing() {
        assert_eq!(parse_lines(" 343, SP455 ,,485"), vec!["343", "SP455", "485"]);
        assert_eq!(parse_network_quality("auto").unwrap(), None);
        assert_eq!(
            parse_network_quality("Cellular_Poor").unwrap(),
            Some(NetworkQuality::CellularPoor)
        );
        assert!(parse_network_quality("5g").is_err());
    }

    #[test]
    fn test_toml_document_overrides_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            lines = ["343", "SP455"]

            [cache]
            dir = "/var/cache/linewatch"

            [polling]
            network_quality = "wifi"
            "#,
        )
        .unwrap();

        assert_eq!(config.lines.len(), 2);
        assert_eq!(config.cache.dir, "/var/cache/linewatch");
        assert_eq!(config.cache.fresh_window_secs, 30);
        assert_eq!(config.polling.network_quality, Some(NetworkQuality::Wifi));
        assert!(validate_config(&config).is_ok());
    }
}
