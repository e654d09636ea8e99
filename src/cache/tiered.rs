//! Ordered composition of backends, fastest first.

use std::sync::Arc;

use tracing::trace;

use super::backend::{CacheBackend, Startable};
use super::keys::CacheKey;
use super::representation::CachedRepresentation;

pub struct TieredBackend {
    tiers: Vec<Arc<dyn CacheBackend>>,
}

impl TieredBackend {
    pub fn new(tiers: Vec<Arc<dyn CacheBackend>>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheBackend>] {
        &self.tiers
    }
}

/// Every tier owns a distinct copy; bodies memoised later stay in that tier.
fn copy_of(rep: &CachedRepresentation) -> Arc<CachedRepresentation> {
    Arc::new(rep.clone())
}

impl CacheBackend for TieredBackend {
    fn load_representation(&self, key: &CacheKey) -> Option<Arc<CachedRepresentation>> {
        for (index, tier) in self.tiers.iter().enumerate() {
            let Some(rep) = tier.load_representation(key) else {
                continue;
            };
            if index > 0 {
                trace!(cache = "tiered", key = %key, from = index, "promoting hit");
                for faster in &self.tiers[..index] {
                    faster.store_representation(key.clone(), copy_of(&rep));
                }
            }
            return Some(rep);
        }
        None
    }

    fn store_representation(&self, key: CacheKey, representation: Arc<CachedRepresentation>) {
        let Some((first, rest)) = self.tiers.split_first() else {
            return;
        };
        for tier in rest {
            tier.store_representation(key.clone(), copy_of(&representation));
        }
        first.store_representation(key, representation);
    }

    fn delete_representation(&self, key: &CacheKey) {
        for tier in &self.tiers {
            tier.delete_representation(key);
        }
    }

    fn delete_group(&self, group: &str) {
        for tier in &self.tiers {
            tier.delete_group(group);
        }
    }

    fn startables(&self) -> Vec<Arc<dyn Startable>> {
        self.tiers.iter().flat_map(|tier| tier.startables()).collect()
    }
}
