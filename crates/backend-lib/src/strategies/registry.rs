// ============================
// passport-backend-lib/src/strategies/registry.rs
// ============================
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::{demo, vkontakte, Strategy, StrategyContext, StrategyInit};
use crate::config::ProviderEntry;

pub type StrategyConstructor = fn(StrategyInit) -> Arc<dyn Strategy>;

/// Every adapter type this build knows, by type name
pub fn get_strategies() -> HashMap<&'static str, StrategyConstructor> {
    let mut table: HashMap<&'static str, StrategyConstructor> = HashMap::new();
    table.insert(vkontakte::TYPE_NAME, vkontakte::construct);
    table.insert(demo::TYPE_NAME, demo::construct);
    table
}

/// A configured provider that was not instantiated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProvider {
    pub provider: String,
    pub kind: String,
}

/// Configured strategy instances, keyed by provider. Fixed after build.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
    skipped: Vec<SkippedProvider>,
}

impl StrategyRegistry {
    /// Instantiate every configured provider whose type is known. Unknown
    /// types are skipped; a repeated provider key replaces the earlier one.
    pub fn build(entries: &[ProviderEntry], context: &StrategyContext) -> Self {
        let constructors = get_strategies();
        let mut registry = Self::default();

        for entry in entries {
            let Some(construct) = constructors.get(entry.kind.as_str()) else {
                warn!(
                    provider = %entry.provider,
                    kind = %entry.kind,
                    "unknown strategy type, provider skipped"
                );
                registry.skipped.push(SkippedProvider {
                    provider: entry.provider.clone(),
                    kind: entry.kind.clone(),
                });
                continue;
            };

            let strategy = construct(StrategyInit {
                provider: entry.provider.clone(),
                config: entry.config.clone(),
                context: context.clone(),
            });
            if registry
                .strategies
                .insert(entry.provider.clone(), strategy)
                .is_some()
            {
                warn!(provider = %entry.provider, "provider configured twice, last entry wins");
            }
        }

        registry
    }

    pub fn get(&self, provider: &str) -> Option<&Arc<dyn Strategy>> {
        self.strategies.get(provider)
    }

    /// Provider keys, sorted
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Strategy>)> {
        self.strategies.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn skipped(&self) -> &[SkippedProvider] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
