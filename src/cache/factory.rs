//! Backend construction from a [`BackendConfig`].

use std::sync::Arc;

use tracing::info;

use super::backend::CacheBackend;
use super::bounded::BoundedBackend;
use super::config::{BackendConfig, BackendKind};
use super::error::CacheError;
use super::map::MapBackend;
use super::tiered::TieredBackend;

/// Build the configured backend; `Ok(None)` means caching is disabled.
///
/// The whole tree is validated before anything is constructed. Error keys
/// are qualified with `cache.`.
pub fn build_backend(config: &BackendConfig) -> Result<Option<Arc<dyn CacheBackend>>, CacheError> {
    config.validate().map_err(|error| error.within("cache"))?;
    if config.kind == BackendKind::None {
        info!(cache = "none", "representation cache disabled");
        return Ok(None);
    }
    build(config)
        .map(Some)
        .map_err(|error| error.within("cache"))
}

fn build(config: &BackendConfig) -> Result<Arc<dyn CacheBackend>, CacheError> {
    let backend: Arc<dyn CacheBackend> = match config.kind {
        BackendKind::Map => Arc::new(MapBackend::with_prune_frequency(config.prune_frequency())),
        BackendKind::Bounded => Arc::new(BoundedBackend::new(config.bounded_options()?)?),
        BackendKind::Tiered => {
            let mut tiers = Vec::with_capacity(config.tiers.len());
            for (index, tier) in config.tiers.iter().enumerate() {
                tiers.push(build(tier).map_err(|error| error.within(&format!("tiers[{index}]")))?);
            }
            Arc::new(TieredBackend::new(tiers))
        }
        BackendKind::None => {
            return Err(CacheError::invalid_config("type", "a tier cannot be `none`"));
        }
    };
    info!(cache = config.kind.as_str(), "representation cache configured");
    Ok(backend)
}
