use super::AssetSource;
use anyhow::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Picks uniformly from a fixed list of asset references.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    assets: Vec<String>,
}

impl StaticCatalog {
    pub fn new(assets: Vec<String>) -> Arc<Self> {
        let assets = assets
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        Arc::new(Self { assets })
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[async_trait]
impl AssetSource for StaticCatalog {
    async fn pick(&self) -> Result<Option<String>> {
        Ok(self.assets.choose(&mut rand::thread_rng()).cloned())
    }
}
