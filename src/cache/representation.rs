//! Stored representations.
//!
//! A [`CachedRepresentation`] keeps one logical payload in any number of
//! content codings. Missing codings are produced on demand from the cheapest
//! stored source and memoised on the representation itself, so the codec work
//! never runs under a backend lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::codec::{EncodingType, REENCODE_PRIORITY, transcode};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::representation";
const METRIC_REENCODE: &str = "repcache_reencode_total";

/// Response headers that are regenerated for every response and never stored.
pub const TRANSPORT_HEADERS: [&str; 9] = [
    "cache-control",
    "connection",
    "content-encoding",
    "content-length",
    "date",
    "server",
    "transfer-encoding",
    "vary",
    "x-cache",
];

pub fn is_transport_header(name: &[u8]) -> bool {
    TRANSPORT_HEADERS
        .iter()
        .any(|candidate| candidate.as_bytes().eq_ignore_ascii_case(name))
}

/// Absolute expiration `ttl` from `now`, saturating at the largest date.
pub fn expiration_after(now: OffsetDateTime, ttl: Duration) -> OffsetDateTime {
    time::Duration::try_from(ttl)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .unwrap_or_else(|| time::PrimitiveDateTime::MAX.assume_utc())
}

/// A cached artifact: headers, groups and a multi-coding body.
pub struct CachedRepresentation {
    groups: BTreeSet<String>,
    headers: Vec<(Bytes, Bytes)>,
    body: RwLock<HashMap<EncodingType, Bytes>>,
    expiration: OffsetDateTime,
}

impl CachedRepresentation {
    /// Create an empty representation expiring at `expiration`.
    pub fn new(expiration: OffsetDateTime) -> Self {
        Self {
            groups: BTreeSet::new(),
            headers: Vec::new(),
            body: RwLock::new(HashMap::new()),
            expiration,
        }
    }

    /// Create an empty representation that lives for `ttl` from now.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(expiration_after(OffsetDateTime::now_utc(), ttl))
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(
            groups
                .into_iter()
                .map(Into::into)
                .filter(|group: &String| !group.is_empty()),
        );
        self
    }

    /// Attach headers to replay on hits. Transport-management headers are dropped.
    pub fn with_headers<I, N, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        for (name, value) in headers {
            let name = name.into();
            if is_transport_header(&name) {
                continue;
            }
            self.headers.push((name, value.into()));
        }
        self
    }

    pub fn with_body(self, encoding: EncodingType, body: impl Into<Bytes>) -> Self {
        self.insert_body(encoding, body);
        self
    }

    pub fn insert_body(&self, encoding: EncodingType, body: impl Into<Bytes>) {
        rw_write(&self.body, SOURCE, "insert_body").insert(encoding, body.into());
    }

    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    pub fn headers(&self) -> &[(Bytes, Bytes)] {
        &self.headers
    }

    pub fn expiration(&self) -> OffsetDateTime {
        self.expiration
    }

    pub fn expired(&self) -> bool {
        self.expired_at(OffsetDateTime::now_utc())
    }

    pub fn expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expiration
    }

    pub fn time_to_live(&self) -> Duration {
        self.time_to_live_at(OffsetDateTime::now_utc())
    }

    pub fn time_to_live_at(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(self.expiration - now).unwrap_or(Duration::ZERO)
    }

    /// Codings currently materialised, in no particular order.
    pub fn encodings(&self) -> Vec<EncodingType> {
        rw_read(&self.body, SOURCE, "encodings")
            .keys()
            .copied()
            .collect()
    }

    pub fn has_body(&self) -> bool {
        !rw_read(&self.body, SOURCE, "has_body").is_empty()
    }

    /// Return the body in `encoding`, re-encoding from a stored coding if needed.
    ///
    /// The flag is true when the body had to be produced by this call; callers
    /// may want to persist the grown representation.
    pub fn get_body(&self, encoding: EncodingType) -> Option<(Bytes, bool)> {
        if let Some(body) = rw_read(&self.body, SOURCE, "get_body").get(&encoding) {
            return Some((body.clone(), false));
        }
        if !encoding.is_real() {
            return None;
        }

        for source in REENCODE_PRIORITY {
            let Some(stored) = rw_read(&self.body, SOURCE, "get_body.source")
                .get(&source)
                .cloned()
            else {
                continue;
            };

            match transcode(source, encoding, &stored) {
                Ok(encoded) => {
                    debug!(from = %source, to = %encoding, bytes = encoded.len(), "re-encoded body");
                    counter!(METRIC_REENCODE, "to" => encoding.to_string()).increment(1);
                    let encoded = Bytes::from(encoded);
                    let body = rw_write(&self.body, SOURCE, "get_body.memoize")
                        .entry(encoding)
                        .or_insert(encoded)
                        .clone();
                    return Some((body, true));
                }
                Err(error) => {
                    warn!(from = %source, to = %encoding, error = %error, "re-encode failed; trying next source");
                }
            }
        }

        None
    }

    /// Admission cost: group names, header bytes and every body variant.
    pub fn size(&self) -> usize {
        let groups: usize = self.groups.iter().map(String::len).sum();
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.len() + value.len())
            .sum();
        let body: usize = rw_read(&self.body, SOURCE, "size")
            .values()
            .map(Bytes::len)
            .sum();
        groups + headers + body
    }
}

impl Clone for CachedRepresentation {
    fn clone(&self) -> Self {
        Self {
            groups: self.groups.clone(),
            headers: self.headers.clone(),
            body: RwLock::new(rw_read(&self.body, SOURCE, "clone").clone()),
            expiration: self.expiration,
        }
    }
}

impl std::fmt::Debug for CachedRepresentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRepresentation")
            .field("groups", &self.groups)
            .field("headers", &self.headers.len())
            .field("encodings", &self.encodings())
            .field("expiration", &self.expiration)
            .finish()
    }
}
