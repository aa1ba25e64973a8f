//! Bounded string interning.
//!
//! Catalog snapshots and script tables repeat the same short strings over and
//! over (tag names, option labels, "Enabled"/"Disabled"). An [`InternPool`]
//! hands out shared [`Text`] handles so a few thousand records don't carry a
//! few thousand copies of each.
//!
//! The pool is owned by whoever creates it and passed explicitly to the code
//! that deserializes records or normalizes script output. Once it reaches its
//! capacity it stops admitting new strings: lookups of already-interned
//! strings still hit, everything else is returned as a fresh allocation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, immutable text handle produced by an [`InternPool`].
pub type Text = Arc<str>;

/// Strings longer than this are never interned; they are unlikely to repeat.
pub const MAX_INTERNED_LEN: usize = 256;

pub struct InternPool {
    capacity: usize,
    strings: Mutex<HashSet<Text>>,
    saturated: AtomicBool,
}

impl InternPool {
    pub const DEFAULT_CAPACITY: usize = 16 * 1024;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            strings: Mutex::new(HashSet::new()),
            saturated: AtomicBool::new(false),
        }
    }

    /// Return the shared handle for `value`, interning it if there is room.
    pub fn intern(&self, value: &str) -> Text {
        if value.len() > MAX_INTERNED_LEN {
            return Text::from(value);
        }
        // A panic while holding the lock can't leave the set half-updated.
        let mut strings = self.strings.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = strings.get(value) {
            return Arc::clone(existing);
        }
        let text = Text::from(value);
        if strings.len() < self.capacity {
            strings.insert(Arc::clone(&text));
        } else if !self.saturated.swap(true, Ordering::Relaxed) {
            tracing::debug!(capacity = self.capacity, "Intern pool is full; no longer interning new strings");
        }
        text
    }

    pub fn len(&self) -> usize {
        self.strings.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_saturated(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InternPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for InternPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternPool").field("capacity", &self.capacity).field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_same_string_shares_allocation() {
        let pool = InternPool::default();
        let a = pool.intern("Enabled");
        let b = pool.intern("Enabled");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_stops_interning_when_full() {
        let pool = InternPool::new(2);
        let first = pool.intern("one");
        pool.intern("two");
        assert!(pool.is_saturated());
        // Existing entries still resolve to the pooled handle.
        assert!(Arc::ptr_eq(&first, &pool.intern("one")));
        // New ones are handed back without being admitted.
        let a = pool.intern("three");
        let b = pool.intern("three");
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), pool.capacity());
    }

    #[rstest]
    #[case::at_limit(MAX_INTERNED_LEN, 1)]
    #[case::over_limit(MAX_INTERNED_LEN + 1, 0)]
    fn test_long_strings_bypass_pool(#[case] len: usize, #[case] expected: usize) {
        let pool = InternPool::default();
        pool.intern(&"x".repeat(len));
        assert_eq!(pool.len(), expected);
    }

    #[test]
    fn test_zero_capacity_never_interns() {
        let pool = InternPool::new(0);
        assert_eq!(&*pool.intern("tag"), "tag");
        assert!(pool.is_empty());
    }
}
