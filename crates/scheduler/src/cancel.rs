//! Cancellation tokens for in-flight resource loads
//!
//! Every load intent carries a token. The host's asynchronous loader polls
//! it and drops the decode when it flips; the scheduler flips it as soon as
//! the item leaves the keep-alive window or its slot is removed.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative load cancellation
///
/// Clones share the same flag, so a clone handed to a loader thread sees
/// cancellation issued by the scheduler.
///
/// # Example
///
/// ```
/// use clipgrid_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let loader_token = token.clone();
///
/// token.cancel();
/// assert!(loader_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once `cancel()` has been called on any clone
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True if both tokens share the same flag
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding load tokens keyed by item id
///
/// Owned by the single scheduling thread; no locking. At most one token is
/// live per id: registering again cancels the previous one.
#[derive(Debug)]
pub struct CancellationRegistry<K> {
    tokens: HashMap<K, CancellationToken>,
}

impl<K: Eq + Hash> CancellationRegistry<K> {
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
        }
    }

    /// Issue a fresh token for `id`, cancelling any older one
    pub fn register(&mut self, id: K) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.tokens.insert(id, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel and forget the token for `id`.
    ///
    /// Returns `true` if a token was outstanding.
    pub fn cancel(&mut self, id: &K) -> bool {
        match self.tokens.remove(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget the token for `id` without cancelling it (the load finished)
    pub fn release(&mut self, id: &K) -> bool {
        self.tokens.remove(id).is_some()
    }

    /// Cancel every outstanding token. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tokens.len();
        for (_, token) in self.tokens.drain() {
            token.cancel();
        }
        count
    }

    pub fn get(&self, id: &K) -> Option<&CancellationToken> {
        self.tokens.get(id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<K: Eq + Hash> Default for CancellationRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads still outstanding when the owner goes away are unwanted
impl<K> Drop for CancellationRegistry<K> {
    fn drop(&mut self) {
        for token in self.tokens.values() {
            token.cancel();
        }
    }
}
