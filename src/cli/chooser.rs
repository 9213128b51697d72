//! Interactive provider chooser

use async_trait::async_trait;
use dialoguer::Select;
use tracing::warn;

use crate::broker::ProviderChooser;
use crate::provider::{ProviderDescriptor, ProviderKind};

/// Terminal menu over the registry; Esc or `q` dismisses it
#[derive(Debug, Default, Clone, Copy)]
pub struct DialoguerChooser;

#[async_trait]
impl ProviderChooser for DialoguerChooser {
    async fn choose(&self, providers: &[ProviderDescriptor]) -> Option<ProviderKind> {
        let items: Vec<String> = providers
            .iter()
            .map(|d| format!("{} ({})", d.display_name, d.key))
            .collect();
        let keys: Vec<ProviderKind> = providers.iter().map(|d| d.key).collect();

        let picked = tokio::task::spawn_blocking(move || {
            Select::new()
                .with_prompt("Choose a wallet")
                .items(&items)
                .default(0)
                .interact_opt()
        })
        .await;

        match picked {
            Ok(Ok(Some(index))) => keys.get(index).copied(),
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                warn!("Wallet chooser failed: {}", e);
                None
            }
            Err(e) => {
                warn!("Wallet chooser task failed: {}", e);
                None
            }
        }
    }
}
