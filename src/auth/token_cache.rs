use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::store::model::Principal;

struct CachedPrincipal {
    principal: Principal,
    expires_at: Instant,
}

/// Bounded map from opaque token to resolved principal.
///
/// Guarantees:
/// - No entry is returned past its TTL; expired entries are evicted in place
///   on lookup.
/// - Memory is bounded by `max_entries`. On insert at capacity, the entry
///   with the earliest expiration is evicted; with a uniform TTL that is
///   the least-recently-inserted entry, a cheap LRU approximation.
/// - Contents are advisory: a miss always falls through to full resolution.
pub struct TokenCache {
    max_entries: usize,
    ttl: Duration,
    inner: Mutex<HashMap<String, CachedPrincipal>>,
}

impl TokenCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, token: &str) -> Option<Principal> {
        self.get_at(token, Instant::now())
    }

    pub fn set(&self, token: &str, principal: Principal) {
        self.set_at(token, principal, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn get_at(&self, token: &str, now: Instant) -> Option<Principal> {
        let mut inner = self.inner.lock();
        match inner.get(token) {
            Some(entry) if entry.expires_at > now => Some(entry.principal.clone()),
            Some(_) => {
                inner.remove(token);
                None
            }
            None => None,
        }
    }

    fn set_at(&self, token: &str, principal: Principal, now: Instant) {
        let mut inner = self.inner.lock();

        if !inner.contains_key(token) && inner.len() >= self.max_entries {
            let victim = inner
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                inner.remove(&victim);
            }
        }

        inner.insert(
            token.to_string(),
            CachedPrincipal {
                principal,
                expires_at: now + self.ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn mk_principal(name: &str) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            username: name.to_string(),
            weight: 1.0,
            is_admin: false,
        }
    }

    #[test]
    fn hit_within_ttl_miss_after() {
        let cache = TokenCache::new(10, Duration::from_secs(5));
        let t0 = Instant::now();

        cache.set_at("tok", mk_principal("u"), t0);

        let hit = cache.get_at("tok", t0 + Duration::from_secs(4));
        assert_eq!(hit.unwrap().username, "u");

        // At exactly the TTL boundary the entry is stale.
        assert!(cache.get_at("tok", t0 + Duration::from_secs(5)).is_none());
        // Expired entry was evicted in place.
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_at_capacity_evicts_earliest_expiration() {
        let cache = TokenCache::new(2, Duration::from_secs(5));
        let t0 = Instant::now();

        cache.set_at("old", mk_principal("old"), t0);
        cache.set_at("mid", mk_principal("mid"), t0 + Duration::from_secs(1));
        cache.set_at("new", mk_principal("new"), t0 + Duration::from_secs(2));

        assert_eq!(cache.len(), 2);
        let now = t0 + Duration::from_secs(3);
        assert!(cache.get_at("old", now).is_none());
        assert!(cache.get_at("mid", now).is_some());
        assert!(cache.get_at("new", now).is_some());
    }

    #[test]
    fn updating_existing_token_does_not_evict() {
        let cache = TokenCache::new(2, Duration::from_secs(5));
        let t0 = Instant::now();

        cache.set_at("a", mk_principal("a1"), t0);
        cache.set_at("b", mk_principal("b"), t0);
        cache.set_at("a", mk_principal("a2"), t0 + Duration::from_secs(1));

        assert_eq!(cache.len(), 2);
        let now = t0 + Duration::from_secs(2);
        assert_eq!(cache.get_at("a", now).unwrap().username, "a2");
        assert!(cache.get_at("b", now).is_some());
    }

    #[test]
    fn unknown_token_is_a_clean_miss() {
        let cache = TokenCache::new(2, Duration::from_secs(5));
        assert!(cache.get("nope").is_none());
    }
}
