//! repcache: representation cache and content negotiation for HTTP services.
//!
//! - [`cache`]: stored representations, codecs, and the pluggable backends.
//! - [`negotiate`]: `Accept`, `Accept-Language` and `Accept-Encoding` matching.
//! - [`engine`]: glue that negotiates, looks up, produces and serves.

pub mod cache;
pub mod config;
pub mod engine;
pub mod infra;
pub mod negotiate;
