//! A [vector clock](https://en.wikipedia.org/wiki/Vector_clock) for the causality
//! (happens-before) order of recorded events.
//!
//! Every event derives its clock from the clock of its program-order parent and from the
//! clocks of the events it depends on. Deep executions create many clocks, so
//! [`VectorClock`] shares its storage: [`Clone`] is a reference count bump and the entries are
//! only copied the first time a shared clock is mutated.
//!
//! Entry `i` counts how many events of thread `i` a clock has observed, so an event at
//! position `p` (0-based) of thread `i` is observed iff `clock[i] > p`.

use std::cmp::{max, Ordering};
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A persistent vector clock providing a partial causal order on events.
#[derive(Clone, Debug, Default, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VectorClock(Arc<Vec<u32>>);

/// Creates a [`VectorClock`] containing the specified elements.
///
/// # Example
/// ```
/// use vector_clock::vclock;
///
/// let x = vclock![];
/// let y = vclock![42, 0, 1];
/// assert!(y.observes(0, 41));
/// assert!(!x.observes(0, 0));
/// ```
#[macro_export]
macro_rules! vclock {
    () => (
        $crate::VectorClock::new()
    );
    ($($x:expr),+ $(,)?) => (
        $crate::VectorClock::from(vec![$($x),+])
    );
}

impl VectorClock {
    pub fn new() -> Self {
        VectorClock(Arc::new(Vec::new()))
    }

    pub fn new_with_len(len: usize) -> Self {
        VectorClock(Arc::new(vec![0; len]))
    }

    /// Number of events of `thread` observed by this clock.
    pub fn get(&self, thread: usize) -> u32 {
        self.0.get(thread).copied().unwrap_or(0)
    }

    /// Whether the event at 0-based `position` of `thread` is in the causal past described by
    /// this clock.
    pub fn observes(&self, thread: usize, position: usize) -> bool {
        (self.get(thread) as usize) > position
    }

    pub fn increment(&mut self, thread: usize) {
        let entries = Arc::make_mut(&mut self.0);
        if thread >= entries.len() {
            entries.resize(1 + thread, 0);
        }
        entries[thread] += 1;
    }

    /// Component-wise maximum. Does not copy the shared storage when `other` adds nothing.
    pub fn merge_in(&mut self, other: &Self) {
        if Arc::ptr_eq(&self.0, &other.0) || other.le_componentwise(self) {
            return;
        }
        let entries = Arc::make_mut(&mut self.0);
        if other.0.len() > entries.len() {
            entries.resize(other.0.len(), 0);
        }
        for (mine, theirs) in entries.iter_mut().zip(other.0.iter()) {
            *mine = max(*mine, *theirs);
        }
    }

    /// The union of two clocks.
    pub fn join(&self, other: &Self) -> Self {
        let mut joined = self.clone();
        joined.merge_in(other);
        joined
    }

    /// Length of the underlying storage, which may include trailing zeros.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|elem| *elem == 0)
    }

    /// Whether two clocks share storage. Exposed so callers can assert that derivation does
    /// not copy needlessly.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn reset(&mut self) {
        if !self.is_empty() {
            Arc::make_mut(&mut self.0).iter_mut().for_each(|e| *e = 0);
        }
    }

    fn le_componentwise(&self, rhs: &Self) -> bool {
        self.0
            .iter()
            .enumerate()
            .all(|(i, elem)| *elem <= rhs.get(i))
    }
}

impl Display for VectorClock {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "<")?;
        for (i, elem) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", elem)?;
        }
        write!(f, ">")
    }
}

impl From<Vec<u32>> for VectorClock {
    fn from(v: Vec<u32>) -> Self {
        VectorClock(Arc::new(v))
    }
}

impl Hash for VectorClock {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let cutoff = self
            .0
            .iter()
            .rposition(|elem| elem != &0)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.0[..cutoff].hash(state);
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, rhs: &Self) -> bool {
        (0..max(self.0.len(), rhs.0.len())).all(|i| self.get(i) == rhs.get(i))
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, rhs: &Self) -> Option<Ordering> {
        let mut expected_ordering = Ordering::Equal;
        for i in 0..max(self.0.len(), rhs.0.len()) {
            let ordering = self.get(i).cmp(&rhs.get(i));
            // Once an element is `Less`/`Greater`, every later element must agree or be
            // `Equal`, otherwise the clocks are concurrent.
            if expected_ordering == Ordering::Equal {
                expected_ordering = ordering;
            } else if ordering != expected_ordering && ordering != Ordering::Equal {
                return None;
            }
        }
        Some(expected_ordering)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn can_display() {
        assert_eq!(format!("{}", vclock![1, 2, 3, 4]), "<1 2 3 4>");
        assert_eq!(format!("{}", vclock![]), "<>");
        assert_eq!(format!("{}", vclock![0]), "<0>");
    }

    #[test]
    fn can_equate_ignoring_trailing_zeros() {
        assert_eq!(vclock![], vclock![0]);
        assert_eq!(vclock![1, 0], vclock![1]);
        assert_ne!(vclock![], vclock![1]);
    }

    #[test]
    fn can_hash_equal_clocks_alike() {
        use std::collections::hash_map::DefaultHasher;

        let digest = |clock: &VectorClock| {
            let mut h = DefaultHasher::new();
            clock.hash(&mut h);
            h.finish()
        };
        assert_eq!(digest(&vclock![]), digest(&vclock![0, 0]));
        assert_eq!(digest(&vclock![1]), digest(&vclock![1, 0]));
        assert_ne!(digest(&vclock![]), digest(&vclock![1]));
    }

    #[test]
    fn observes_positions_below_each_entry() {
        let clock = vclock![2, 0, 1];
        assert!(clock.observes(0, 0));
        assert!(clock.observes(0, 1));
        assert!(!clock.observes(0, 2));
        assert!(!clock.observes(1, 0));
        assert!(clock.observes(2, 0));
        assert!(!clock.observes(7, 0));
    }

    #[test]
    fn increments_copy_on_write() {
        let parent = vclock![1, 1];
        let mut child = parent.clone();
        assert!(child.shares_storage_with(&parent));

        child.increment(3);
        assert!(!child.shares_storage_with(&parent));
        assert_eq!(child, vclock![1, 1, 0, 1]);
        assert_eq!(parent, vclock![1, 1]);
    }

    #[test]
    fn merges_component_wise_max() {
        let mut x = vclock![1, 2, 3, 4];
        x.merge_in(&vclock![5, 6, 0]);
        assert_eq!(x, vclock![5, 6, 3, 4]);

        let y = vclock![1, 0, 2].join(&vclock![3, 1, 0, 4]);
        assert_eq!(y, vclock![3, 1, 2, 4]);
    }

    #[test]
    fn merging_an_observed_clock_keeps_storage_shared() {
        let big = vclock![3, 3];
        let mut copy = big.clone();
        copy.merge_in(&vclock![1, 2]);
        assert!(copy.shares_storage_with(&big));
    }

    #[test]
    fn can_order_partially() {
        use Ordering::*;

        assert_eq!(Some(Equal), vclock![].partial_cmp(&vclock![0, 0]));
        assert_eq!(Some(Equal), vclock![1, 2, 0].partial_cmp(&vclock![1, 2]));

        assert_eq!(Some(Less), vclock![].partial_cmp(&vclock![1]));
        assert_eq!(Some(Less), vclock![1, 2, 3].partial_cmp(&vclock![1, 3, 3]));

        assert_eq!(Some(Greater), vclock![1, 2, 4].partial_cmp(&vclock![0, 1, 3]));

        assert_eq!(None, vclock![1, 2, 3].partial_cmp(&vclock![1, 3, 2]));
        assert_eq!(None, vclock![1, 2, 2].partial_cmp(&vclock![2, 1, 2]));
    }

    #[test]
    fn resets_to_zero() {
        let mut clock = vclock![4, 5];
        clock.reset();
        assert!(clock.is_empty());
        assert_eq!(clock, vclock![]);
    }
}
