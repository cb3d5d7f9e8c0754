//! Display-name resolution for one client session.
//!
//! Resolution order, first match wins:
//! 1. an explicit `user` value (URL query parameter or CLI flag), which is
//!    then persisted for the rest of the session;
//! 2. a value persisted earlier in the same session;
//! 3. a generated `demo-NNN` name, persisted.
//!
//! Persistence goes through [`SessionStore`], which is scoped to one client
//! session (one browser tab, one terminal process) and never shared.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};

use rand::Rng;
use reqwest::Url;

pub const IDENTITY_STORAGE_KEY: &str = "livechat-demo-user";
pub const IDENTITY_PREFIX: &str = "demo-";
pub const IDENTITY_RANGE: RangeInclusive<u32> = 100..=999;

/// Key-value storage that lives exactly as long as one client session.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// In-process [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value.to_owned());
    }
}

/// Extract a non-empty `user` query parameter from a page URL.
#[must_use]
pub fn user_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Resolve the session identity. Always returns a non-empty name.
pub fn resolve_identity(requested: Option<&str>, store: &dyn SessionStore) -> String {
    if let Some(user) = requested.filter(|u| !u.is_empty()) {
        store.set(IDENTITY_STORAGE_KEY, user);
        return user.to_owned();
    }

    if let Some(stored) = store.get(IDENTITY_STORAGE_KEY).filter(|u| !u.is_empty()) {
        return stored;
    }

    let generated = generate_identity(&mut rand::rng());
    store.set(IDENTITY_STORAGE_KEY, &generated);
    generated
}

/// `demo-` followed by a number drawn uniformly from [`IDENTITY_RANGE`].
pub fn generate_identity<R: Rng + ?Sized>(rng: &mut R) -> String {
    let n = rng.random_range(IDENTITY_RANGE);
    format!("{IDENTITY_PREFIX}{n}")
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
