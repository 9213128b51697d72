//! Explicit wallet context
//!
//! Owns everything one application needs: the configuration, the connection
//! broker (and with it the session state) and the contract facade. Construct
//! one per process and pass it around; there is no global instance.

use std::sync::Arc;

use tracing::info;

use crate::broker::{ConnectionBroker, NoChooser, ProviderChooser};
use crate::cache::{FileSelectionCache, SelectionCache};
use crate::config::Config;
use crate::contract::ContractFacade;
use crate::provider::{BackendFactory, DefaultBackendFactory, ProviderRegistry};
use crate::session::SessionView;

pub struct WalletContext {
    config: Config,
    broker: ConnectionBroker,
    contracts: ContractFacade,
}

impl WalletContext {
    /// Context with the real backends, the file cache and no chooser
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> WalletContextBuilder {
        WalletContextBuilder {
            config,
            factory: None,
            cache: None,
            chooser: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> &ConnectionBroker {
        &self.broker
    }

    pub fn contracts(&self) -> &ContractFacade {
        &self.contracts
    }

    pub fn session(&self) -> SessionView {
        self.broker.session()
    }

    /// Close the live session; the cached selection survives for next start
    pub async fn shutdown(&self) {
        self.broker.shutdown().await;
        info!("Wallet context shut down");
    }
}

pub struct WalletContextBuilder {
    config: Config,
    factory: Option<Arc<dyn BackendFactory>>,
    cache: Option<Arc<dyn SelectionCache>>,
    chooser: Option<Arc<dyn ProviderChooser>>,
}

impl WalletContextBuilder {
    pub fn factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn SelectionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn chooser(mut self, chooser: Arc<dyn ProviderChooser>) -> Self {
        self.chooser = Some(chooser);
        self
    }

    pub fn build(self) -> WalletContext {
        let config = self.config;
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DefaultBackendFactory));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(FileSelectionCache::new(&config.wallet.cache_path)));
        let chooser = self.chooser.unwrap_or_else(|| Arc::new(NoChooser));

        let broker = ConnectionBroker::new(
            config.wallet.clone(),
            ProviderRegistry::from_config(&config),
            factory,
            cache,
            chooser,
        );
        let contracts = ContractFacade::new(broker.clone(), &config.wallet);

        WalletContext {
            config,
            broker,
            contracts,
        }
    }
}
