//! HTTP proactive negotiation.
//!
//! [`ResourceRepresentations::negotiate`] picks a content type and language
//! from `Accept` / `Accept-Language`; [`negotiate_encoding`] picks the content
//! coding from `Accept-Encoding`. Both share the weighted-list grammar of
//! [`parse_preferences`].

mod content;
mod encoding;
mod preference;

pub use content::{RepresentationEntry, ResourceRepresentations};
pub use encoding::{NotAcceptable, negotiate_encoding};
pub use preference::{Preference, parse_preferences};
