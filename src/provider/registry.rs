//! Static table of supported wallet backends

use serde::Serialize;

use super::ProviderKind;
use crate::config::Config;

/// Backend-specific construction options
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderOptions {
    Injected {
        endpoint: String,
        ping_interval_secs: u64,
    },
    WalletConnect {
        relay_url: String,
        ping_interval_secs: u64,
        #[serde(skip_serializing)]
        project_id: String,
        app_name: String,
        app_url: String,
    },
    Custodial {
        endpoint: String,
        #[serde(skip_serializing)]
        api_key: String,
        app_name: String,
    },
}

/// One supported backend; immutable once the registry is built
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDescriptor {
    pub key: ProviderKind,
    pub display_name: String,
    pub options: ProviderOptions,
}

/// Registry of supported wallet backends
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Build the standard table from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(vec![
            ProviderDescriptor {
                key: ProviderKind::Injected,
                display_name: "Browser Wallet".to_string(),
                options: ProviderOptions::Injected {
                    endpoint: config.injected.endpoint.clone(),
                    ping_interval_secs: config.wallet.ping_interval_secs,
                },
            },
            ProviderDescriptor {
                key: ProviderKind::WalletConnect,
                display_name: "WalletConnect".to_string(),
                options: ProviderOptions::WalletConnect {
                    relay_url: config.walletconnect.relay_url.clone(),
                    ping_interval_secs: config.wallet.ping_interval_secs,
                    project_id: config.walletconnect.project_id.clone(),
                    app_name: config.app.name.clone(),
                    app_url: config.app.url.clone(),
                },
            },
            ProviderDescriptor {
                key: ProviderKind::Custodial,
                display_name: "Custodial Wallet".to_string(),
                options: ProviderOptions::Custodial {
                    endpoint: config.custodial.endpoint.clone(),
                    api_key: config.custodial.api_key.clone(),
                    app_name: config.app.name.clone(),
                },
            },
        ])
    }

    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderDescriptor> {
        self.descriptors.iter().find(|d| d.key == kind)
    }

    /// Look up by string key; unknown keys return `None`
    pub fn lookup(&self, key: &str) -> Option<&ProviderDescriptor> {
        key.parse::<ProviderKind>().ok().and_then(|kind| self.get(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_config() {
        let mut config = Config::default();
        config.app.name = "Ledgerboard".to_string();
        config.wallet.ping_interval_secs = 7;
        let registry = ProviderRegistry::from_config(&config);

        assert_eq!(registry.descriptors().len(), 3);
        let wc = registry.get(ProviderKind::WalletConnect).unwrap();
        match &wc.options {
            ProviderOptions::WalletConnect {
                app_name,
                ping_interval_secs,
                ..
            } => {
                assert_eq!(app_name, "Ledgerboard");
                assert_eq!(*ping_interval_secs, 7);
            }
            other => panic!("unexpected options {:?}", other),
        }
        let injected = registry.get(ProviderKind::Injected).unwrap();
        assert!(matches!(
            injected.options,
            ProviderOptions::Injected { ping_interval_secs: 7, .. }
        ));
    }

    #[test]
    fn test_lookup() {
        let registry = ProviderRegistry::from_config(&Config::default());
        assert_eq!(
            registry.lookup("injected").map(|d| d.key),
            Some(ProviderKind::Injected)
        );
        assert!(registry.lookup("trezor").is_none());

        let partial = ProviderRegistry::new(registry.descriptors()[..1].to_vec());
        assert!(partial.lookup("custodial").is_none());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = Config::default();
        config.custodial.api_key = "sk_live_secret".to_string();
        let registry = ProviderRegistry::from_config(&config);
        let json = serde_json::to_string(registry.descriptors()).unwrap();
        assert!(!json.contains("sk_live_secret"));
    }
}
