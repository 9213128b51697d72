//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub injected: InjectedConfig,
    #[serde(default)]
    pub walletconnect: WalletConnectConfig,
    #[serde(default)]
    pub custodial: CustodialConfig,
}

/// Connection broker and contract facade options
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Chain id shown before any wallet is connected
    #[serde(default = "default_network")]
    pub default_network: u64,
    /// Persist the last successful provider choice for silent reconnect
    #[serde(default = "default_true")]
    pub cache_selection: bool,
    /// Upper bound on waiting for a submitted transaction to finalize
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    /// Initial interval between receipt polls while waiting for finalization
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    /// Where the cached provider selection is stored
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    /// Keepalive ping period for WebSocket wallet connections
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl WalletConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_network: default_network(),
            cache_selection: true,
            transaction_timeout_ms: default_transaction_timeout_ms(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            cache_path: default_cache_path(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

/// Application metadata presented to wallets
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_url")]
    pub url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            url: default_app_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InjectedConfig {
    /// WebSocket endpoint of the local provider bridge
    #[serde(default = "default_injected_endpoint")]
    pub endpoint: String,
}

impl Default for InjectedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_injected_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConnectConfig {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Relay project id issued to this application
    #[serde(default)]
    pub project_id: String,
}

impl Default for WalletConnectConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            project_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustodialConfig {
    #[serde(default = "default_custodial_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for CustodialConfig {
    fn default() -> Self {
        Self {
            endpoint: default_custodial_endpoint(),
            api_key: String::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_network() -> u64 {
    1
}

fn default_transaction_timeout_ms() -> u64 {
    120_000
}

fn default_receipt_poll_interval_ms() -> u64 {
    1_000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_cache_path() -> String {
    ".walletctl/selection.json".to_string()
}

fn default_app_name() -> String {
    "Portfolio Dashboard".to_string()
}

fn default_app_url() -> String {
    "https://localhost".to_string()
}

fn default_injected_endpoint() -> String {
    "ws://127.0.0.1:1248".to_string()
}

fn default_relay_url() -> String {
    "wss://relay.walletconnect.com".to_string()
}

fn default_custodial_endpoint() -> String {
    "https://custody.example.com/rpc".to_string()
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("wallet.default_network", default_network() as i64)?
            .set_default("wallet.cache_selection", true)?
            .set_default(
                "wallet.transaction_timeout_ms",
                default_transaction_timeout_ms() as i64,
            )?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WALLET_)
            .add_source(
                config::Environment::with_prefix("WALLET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.wallet.transaction_timeout_ms == 0 {
            anyhow::bail!("transaction_timeout_ms must be positive");
        }

        if self.wallet.receipt_poll_interval_ms == 0 {
            anyhow::bail!("receipt_poll_interval_ms must be positive");
        }

        if self.wallet.ping_interval_secs == 0 {
            anyhow::bail!("ping_interval_secs must be positive");
        }

        if self.wallet.receipt_poll_interval_ms > self.wallet.transaction_timeout_ms {
            anyhow::bail!(
                "receipt_poll_interval_ms ({}) cannot exceed transaction_timeout_ms ({})",
                self.wallet.receipt_poll_interval_ms,
                self.wallet.transaction_timeout_ms
            );
        }

        if self.wallet.cache_selection && self.wallet.cache_path.trim().is_empty() {
            anyhow::bail!("cache_path must be set when cache_selection is enabled");
        }

        for (name, endpoint) in [
            ("injected.endpoint", &self.injected.endpoint),
            ("walletconnect.relay_url", &self.walletconnect.relay_url),
            ("custodial.endpoint", &self.custodial.endpoint),
        ] {
            url::Url::parse(endpoint)
                .with_context(|| format!("Invalid {} URL: {}", name, endpoint))?;
        }

        if self.walletconnect.project_id.is_empty() {
            tracing::warn!(
                "walletconnect.project_id is empty - the relay will refuse WalletConnect sessions"
            );
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Wallet:
    default_network: {} ({})
    cache_selection: {}
    cache_path: {}
    transaction_timeout: {}ms
    receipt_poll_interval: {}ms
    ping_interval: {}s
  App:
    name: {}
    url: {}
  Injected:
    endpoint: {}
  WalletConnect:
    relay_url: {}
    project_id: {}
  Custodial:
    endpoint: {}
    api_key: {}
"#,
            self.wallet.default_network,
            crate::network::network_name(self.wallet.default_network),
            self.wallet.cache_selection,
            self.wallet.cache_path,
            self.wallet.transaction_timeout_ms,
            self.wallet.receipt_poll_interval_ms,
            self.wallet.ping_interval_secs,
            self.app.name,
            self.app.url,
            self.injected.endpoint,
            mask_url(&self.walletconnect.relay_url),
            mask_secret(&self.walletconnect.project_id),
            mask_url(&self.custodial.endpoint),
            mask_secret(&self.custodial.api_key),
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

fn mask_secret(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(not set)"
    } else {
        "***"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.wallet.default_network, 1);
        assert!(config.wallet.cache_selection);
        assert_eq!(config.wallet.transaction_timeout_ms, 120_000);
        assert_eq!(config.injected.endpoint, "ws://127.0.0.1:1248");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.wallet.transaction_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_poll_above_timeout() {
        let mut config = Config::default();
        config.wallet.transaction_timeout_ms = 500;
        config.wallet.receipt_poll_interval_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::default();
        config.custodial.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ping_interval() {
        let mut config = Config::default();
        config.wallet.ping_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.toml");
        std::fs::write(
            &path,
            r#"
[wallet]
default_network = 5
cache_selection = false
transaction_timeout_ms = 30000
ping_interval_secs = 10

[app]
name = "Test Dashboard"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.wallet.default_network, 5);
        assert!(!config.wallet.cache_selection);
        assert_eq!(config.wallet.transaction_timeout_ms, 30_000);
        assert_eq!(config.wallet.ping_interval(), Duration::from_secs(10));
        assert_eq!(config.app.name, "Test Dashboard");
        assert_eq!(config.app.url, "https://localhost");
    }

    #[test]
    fn test_masked_display_hides_secrets() {
        let mut config = Config::default();
        config.custodial.api_key = "sk_live_secret".to_string();
        config.walletconnect.project_id = "abc123".to_string();
        let display = config.masked_display();
        assert!(!display.contains("sk_live_secret"));
        assert!(!display.contains("abc123"));
        assert!(display.contains("mainnet"));
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }
}
