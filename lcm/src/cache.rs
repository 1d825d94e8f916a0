//! Process-lifetime caches shared between request handlers
//!
//! Every cache is a cheap-to-clone handle onto a map behind a read/write lock.
//! Locks are only held for the map operation itself, never across a backend
//! call, so concurrent misses may populate the same key twice; the last
//! writer wins.
use std::{
    borrow::Borrow,
    collections::{HashMap, HashSet},
    hash::Hash,
    sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use lcm_core::AccessToken;
use parking_lot::RwLock;

/// A shared map from `K` to `V`
#[derive(Debug)]
pub struct Cache<K, V> {
    store: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash, V: Clone> Cache<K, V> {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the entry for `key`
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.store.read().get(key).cloned()
    }

    /// Store `value` under `key`, replacing any previous entry
    pub fn insert(&self, key: K, value: V) {
        self.store.write().insert(key, value);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

/// Identities on which the mint-token permission has been confirmed
///
/// Membership is one-way: an identity is never removed once added.
#[derive(Clone, Debug, Default)]
pub struct PermissionSet {
    verified: Arc<RwLock<HashSet<String>>>,
}

impl PermissionSet {
    /// Whether `email` has been confirmed
    pub fn contains(&self, email: &str) -> bool {
        self.verified.read().contains(email)
    }

    /// Record `email` as confirmed
    pub fn mark(&self, email: &str) {
        self.verified.write().insert(email.to_owned());
    }
}

/// Access tokens are handed out again only while this far from expiry.
pub const REFRESH_MARGIN_SECS: i64 = 15 * 60;

/// Key of a cached access token: the identity and its normalized scope set
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TokenKey {
    email: String,
    scopes: Vec<String>,
}

impl TokenKey {
    /// Key for `email` minted with `scopes`, in any order
    pub fn new(email: &str, scopes: &[String]) -> Self {
        let mut scopes = scopes.to_vec();
        scopes.sort();
        scopes.dedup();
        Self {
            email: email.to_owned(),
            scopes,
        }
    }
}

/// Minted access tokens, stored with their true expiry
#[derive(Clone, Debug, Default)]
pub struct TokenCache {
    tokens: Cache<TokenKey, AccessToken>,
}

impl TokenCache {
    /// The token for `key` if it is not within the refresh margin at `now`
    pub fn fresh(&self, key: &TokenKey, now: DateTime<Utc>) -> Option<AccessToken> {
        self.tokens
            .get(key)
            .filter(|t| now < t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS))
    }

    /// Remember `token` for `key`
    pub fn insert(&self, key: TokenKey, token: AccessToken) {
        self.tokens.insert(key, token);
    }
}
