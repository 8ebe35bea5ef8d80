//! Handle-addressed connection registry.
//!
//! A [`HandlePool`] maps small integer handles to shared connection objects.
//! Lookups take the pool's read lock; inserts and removals take its write
//! lock. The lock only covers the map: callers clone the `Arc` out, release
//! the pool, and then lock the connection itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Maximum number of resident connections per pool.
pub const MAX_CONNECTIONS: usize = 10_000;

/// Opaque connection identifier handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u64);

impl Handle {
    /// Wraps a raw handle value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic handle source, starting at 1. Values are never reused.
///
/// Several pools may share one sequence so their handles never collide.
#[derive(Debug)]
pub struct HandleSequence(AtomicU64);

impl HandleSequence {
    /// Creates a sequence whose first handle is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    fn next(&self) -> Handle {
        Handle(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HandleSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Concurrency-safe registry of connections of one kind.
pub struct HandlePool<C> {
    entries: RwLock<HashMap<Handle, Arc<C>>>,
    sequence: Arc<HandleSequence>,
    capacity: usize,
}

impl<C> HandlePool<C> {
    /// Creates a pool with its own handle sequence and the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sequence(Arc::new(HandleSequence::new()), MAX_CONNECTIONS)
    }

    /// Creates a pool drawing handles from a shared sequence.
    #[must_use]
    pub fn with_sequence(sequence: Arc<HandleSequence>, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sequence,
            capacity,
        }
    }

    /// Maximum number of resident connections.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers a connection and returns its new handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] when the pool is full. The connection
    /// is not stored and no handle is consumed.
    pub async fn add(&self, connection: Arc<C>) -> Result<Handle> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            return Err(Error::PoolExhausted(self.capacity));
        }
        let handle = self.sequence.next();
        entries.insert(handle, connection);
        Ok(handle)
    }

    /// Looks up a connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleNotFound`] for unknown or removed handles.
    pub async fn get(&self, handle: Handle) -> Result<Arc<C>> {
        self.entries
            .read()
            .await
            .get(&handle)
            .cloned()
            .ok_or(Error::HandleNotFound(handle))
    }

    /// Removes a connection. Removing an absent handle is a no-op.
    pub async fn remove(&self, handle: Handle) -> Option<Arc<C>> {
        self.entries.write().await.remove(&handle)
    }

    /// Number of resident connections.
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Removes and returns every resident connection.
    pub async fn drain(&self) -> Vec<(Handle, Arc<C>)> {
        self.entries.write().await.drain().collect()
    }
}

impl<C> Default for HandlePool<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handles_start_at_one_and_increase() {
        let pool = HandlePool::new();
        let first = pool.add(Arc::new("a")).await.unwrap();
        let second = pool.add(Arc::new("b")).await.unwrap();
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 2);
        assert_eq!(*pool.get(first).await.unwrap(), "a");
        assert_eq!(pool.count().await, 2);
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let pool = HandlePool::new();
        let mut previous = 0;
        for i in 0..MAX_CONNECTIONS {
            let conn = Arc::new(i);
            let handle = pool.add(Arc::clone(&conn)).await.unwrap();
            assert!(handle.get() > previous);
            previous = handle.get();
            assert!(Arc::ptr_eq(&pool.get(handle).await.unwrap(), &conn));
        }

        let err = pool.add(Arc::new(usize::MAX)).await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted(MAX_CONNECTIONS)));
        assert_eq!(pool.count().await, MAX_CONNECTIONS);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let pool = HandlePool::new();
        let handle = pool.add(Arc::new(())).await.unwrap();

        assert!(pool.remove(handle).await.is_some());
        assert!(pool.remove(handle).await.is_none());
        assert!(pool.remove(Handle::new(999)).await.is_none());

        let err = pool.get(handle).await.unwrap_err();
        assert!(matches!(err, Error::HandleNotFound(h) if h == handle));
    }

    #[tokio::test]
    async fn test_handles_are_never_reused() {
        let pool = HandlePool::new();
        let first = pool.add(Arc::new(1)).await.unwrap();
        pool.remove(first).await;
        let second = pool.add(Arc::new(2)).await.unwrap();
        assert_ne!(first, second);
        assert!(pool.get(first).await.is_err());
    }

    #[tokio::test]
    async fn test_shared_sequence_keeps_pools_disjoint() {
        let sequence = Arc::new(HandleSequence::new());
        let imap: HandlePool<&str> = HandlePool::with_sequence(Arc::clone(&sequence), 10);
        let smtp: HandlePool<&str> = HandlePool::with_sequence(sequence, 10);

        let a = imap.add(Arc::new("imap")).await.unwrap();
        let b = smtp.add(Arc::new("smtp")).await.unwrap();
        assert_ne!(a, b);
        assert!(smtp.get(a).await.is_err());
        assert!(imap.get(b).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_empties_pool() {
        let pool = HandlePool::new();
        pool.add(Arc::new(1)).await.unwrap();
        pool.add(Arc::new(2)).await.unwrap();
        assert_eq!(pool.drain().await.len(), 2);
        assert_eq!(pool.count().await, 0);
    }

    #[test]
    fn test_handle_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Handle::new(7)).unwrap(), "7");
        let parsed: Handle = serde_json::from_str("42").unwrap();
        assert_eq!(parsed.get(), 42);
    }
}
