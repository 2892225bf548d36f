//! Bounded recent-value membership.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A set that remembers only the most recent `capacity` insertions.
///
/// Eviction is strictly FIFO by insertion, never by access. Re-adding a value
/// that is already a member pushes another queue entry, so duplicates count
/// against capacity and can push out an older, different value early. A value
/// stays a member for as long as any of its queue entries survives.
#[derive(Debug, Clone)]
pub struct RecyclingSet<T> {
    capacity: usize,
    queue: VecDeque<T>,
    members: HashMap<T, usize>,
}

impl<T: Eq + Hash + Clone> RecyclingSet<T> {
    /// Create a set remembering at most `capacity` insertions.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "recycling set capacity must be non-zero");
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity + 1),
            members: HashMap::with_capacity(capacity),
        }
    }

    /// Insert `value`, evicting the oldest entry if the set is full.
    ///
    /// Returns the evicted value when its last queue entry left the set.
    pub fn add(&mut self, value: T) -> Option<T> {
        self.queue.push_back(value.clone());
        *self.members.entry(value).or_insert(0) += 1;

        if self.queue.len() <= self.capacity {
            return None;
        }
        let oldest = self.queue.pop_front()?;
        match self.members.get_mut(&oldest) {
            Some(count) if *count > 1 => {
                *count -= 1;
                None
            }
            _ => {
                self.members.remove(&oldest);
                Some(oldest)
            }
        }
    }

    /// Returns `true` if `value` is among the recent insertions.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.members.contains_key(value)
    }

    /// Number of distinct members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if nothing was added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Maximum number of remembered insertions.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget every member.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut set = RecyclingSet::new(10);
        for v in 0..10 {
            assert_eq!(set.add(v), None);
        }
        assert_eq!(set.add(10), Some(0));
        assert!(!set.contains(&0));
        assert!((1..=10).all(|v| set.contains(&v)));

        assert_eq!(set.add(0), Some(1));
        assert!(set.contains(&0));
        assert!(!set.contains(&1));
        assert_eq!(set.len(), 10);
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut set = RecyclingSet::new(10);
        for v in 0..100_u32 {
            set.add(v % 17);
            assert!(set.len() <= set.capacity());
        }
    }

    #[test]
    fn test_duplicates_count_against_capacity() {
        let mut set = RecyclingSet::new(3);
        set.add('a');
        set.add('b');
        set.add('b');
        assert_eq!(set.len(), 2);

        // Queue is [a, b, b]; adding c evicts a.
        assert_eq!(set.add('c'), Some('a'));
        // Queue is [b, b, c]; the first b leaves but b is still a member.
        assert_eq!(set.add('d'), None);
        assert!(set.contains(&'b'));
        // Queue is [b, c, d]; now b goes for good.
        assert_eq!(set.add('e'), Some('b'));
        assert!(!set.contains(&'b'));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_clear_forgets_members() {
        let mut set = RecyclingSet::new(2);
        set.add(1_u16);
        set.clear();
        assert!(set.is_empty());
        assert!(!set.contains(&1));
    }

    #[test]
    #[should_panic(expected = "capacity must be non-zero")]
    fn test_zero_capacity_panics() {
        let _ = RecyclingSet::<u8>::new(0);
    }
}
