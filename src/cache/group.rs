//! Invalidation groups.
//!
//! A group is a transient index from a tag to the keys that declared it. The
//! index never owns representations; every access re-validates its members
//! against the owning backend through a lookup callback and drops members
//! that are gone, expired, or no longer declare the group.
//!
//! The callback receives `(group, key)` and returns the member's expiration
//! if it is still stored and still declares the group.

use std::collections::HashMap;

use time::OffsetDateTime;

use super::keys::CacheKey;

/// `(group, key) -> expiration` of a still-valid member.
pub(crate) trait MemberLookup: FnMut(&str, &CacheKey) -> Option<OffsetDateTime> {}

impl<F> MemberLookup for F where F: FnMut(&str, &CacheKey) -> Option<OffsetDateTime> {}

#[derive(Debug, Clone)]
pub(crate) struct CacheGroup {
    keys: Vec<CacheKey>,
    expiration: OffsetDateTime,
}

impl CacheGroup {
    pub(crate) fn keys(&self) -> &[CacheKey] {
        &self.keys
    }

    pub(crate) fn expiration(&self) -> OffsetDateTime {
        self.expiration
    }

    /// Rebuild the member list; returns false when the group should be dropped.
    fn prune(
        &mut self,
        name: &str,
        now: OffsetDateTime,
        lookup: &mut impl MemberLookup,
    ) -> bool {
        let mut latest: Option<OffsetDateTime> = None;
        self.keys.retain(|key| match lookup(name, key) {
            Some(expiration) if expiration >= now => {
                latest = Some(latest.map_or(expiration, |current| current.max(expiration)));
                true
            }
            _ => false,
        });

        match latest {
            Some(expiration) => {
                self.expiration = expiration;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct GroupIndex {
    groups: HashMap<String, CacheGroup>,
}

impl GroupIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append `key` to `group` (once) and prune the group.
    pub(crate) fn add(
        &mut self,
        group: &str,
        key: &CacheKey,
        expiration: OffsetDateTime,
        lookup: &mut impl MemberLookup,
    ) {
        let entry = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| CacheGroup {
                keys: Vec::new(),
                expiration,
            });
        if !entry.keys.contains(key) {
            entry.keys.push(key.clone());
        }
        self.prune(group, lookup);
    }

    /// Prune one group; returns true if it still exists afterwards.
    pub(crate) fn prune(&mut self, group: &str, lookup: &mut impl MemberLookup) -> bool {
        let now = OffsetDateTime::now_utc();
        let alive = match self.groups.get_mut(group) {
            Some(entry) => entry.prune(group, now, lookup),
            None => return false,
        };
        if !alive {
            self.groups.remove(group);
        }
        alive
    }

    /// Prune every group, dropping the empty and expired ones.
    pub(crate) fn prune_all(&mut self, lookup: &mut impl MemberLookup) -> usize {
        let now = OffsetDateTime::now_utc();
        let before = self.groups.len();
        self.groups
            .retain(|name, group| group.prune(name, now, &mut *lookup));
        before - self.groups.len()
    }

    /// Prune `group` and remove it, returning the keys that were still members.
    pub(crate) fn take(
        &mut self,
        group: &str,
        lookup: &mut impl MemberLookup,
    ) -> Vec<CacheKey> {
        if !self.prune(group, lookup) {
            return Vec::new();
        }
        self.groups
            .remove(group)
            .map(|entry| entry.keys)
            .unwrap_or_default()
    }

    pub(crate) fn get(&self, group: &str) -> Option<&CacheGroup> {
        self.groups.get(group)
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }
}
