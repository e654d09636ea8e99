//! Representation storage.
//!
//! - [`CachedRepresentation`]: headers, invalidation groups and a body kept
//!   in any number of content codings.
//! - [`CacheBackend`]: pluggable storage. [`MapBackend`] is unbounded,
//!   [`BoundedBackend`] is size-weighted on `moka`, and [`TieredBackend`]
//!   stacks several backends with promotion on hit.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! type = "bounded"        # map | bounded | tiered | none
//! max_size = 67_108_864
//! average_size = 32_768
//! prune_frequency = 10    # seconds
//! write_buffer = 1024
//! ```

mod backend;
mod bounded;
mod codec;
mod config;
mod error;
mod factory;
mod group;
mod keys;
mod lock;
mod map;
mod representation;
mod tiered;
mod worker;

pub use backend::{CacheBackend, Lifecycle, Startable};
pub use bounded::{BoundedBackend, BoundedOptions, DEFAULT_WRITE_BUFFER};
pub use codec::{CodecError, EncodingType, REENCODE_PRIORITY, SUPPORTED_ENCODINGS};
pub use config::{BackendConfig, BackendKind};
pub use error::CacheError;
pub use factory::build_backend;
pub use keys::CacheKey;
pub use map::{DEFAULT_PRUNE_FREQUENCY, MapBackend};
pub use representation::{
    CachedRepresentation, TRANSPORT_HEADERS, expiration_after, is_transport_header,
};
pub use tiered::TieredBackend;
