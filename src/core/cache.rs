// src/core/cache.rs

//! At-most-once keyed cache.

use log::debug;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// A slot that is filled at most once, shared between every caller asking for
/// the same key.
type Promise<V, E> = Arc<OnceLock<Result<Arc<V>, E>>>;

/// A keyed cache with at-most-once population per key.
///
/// The map lock is held only long enough to fetch or insert the promise for a
/// key; the loader itself runs outside it, so different keys load in parallel
/// while concurrent callers for the same key block on the same `OnceLock`.
/// Failures are cached too, so a broken definition is reported consistently.
pub struct OnceCache<K, V, E> {
    name: &'static str,
    promises: Mutex<HashMap<K, Promise<V, E>>>,
}

impl<K, V, E> OnceCache<K, V, E>
where
    K: Eq + Hash + Clone + Debug,
    E: Clone,
{
    /// Creates an empty cache. `name` only appears in log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            promises: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`, running `load` if nobody has yet.
    ///
    /// # Errors
    /// Returns the (cached) error produced by `load`.
    pub fn get_or_load<F>(&self, key: &K, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let promise = {
            let mut promises = self.promises.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(promises.entry(key.clone()).or_default())
        };

        let mut loaded_here = false;
        let result = promise.get_or_init(|| {
            loaded_here = true;
            debug!("{} cache miss for {:?}", self.name, key);
            load().map(Arc::new)
        });
        if !loaded_here {
            debug!("{} cache hit for {:?}", self.name, key);
        }
        result.clone()
    }

    /// Number of keys requested so far.
    pub fn len(&self) -> usize {
        self.promises
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` until the first key is requested.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, E> Debug for OnceCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceCache").field("name", &self.name).finish()
    }
}
