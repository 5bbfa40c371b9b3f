use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Index, IndexMut},
};

/// Identifies a simulated thread. [`ThreadId::INIT`] is reserved for the synthetic thread that
/// owns the initialization event; program threads are numbered from 1.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ThreadId(usize);

impl ThreadId {
    pub const INIT: ThreadId = ThreadId(0);

    pub fn index(self) -> usize {
        self.0
    }

    pub fn is_init(self) -> bool {
        self == Self::INIT
    }
}

impl Debug for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl From<ThreadId> for usize {
    fn from(id: ThreadId) -> Self {
        id.0
    }
}

impl From<usize> for ThreadId {
    fn from(n: usize) -> Self {
        ThreadId(n)
    }
}

impl<T> Index<ThreadId> for [T] {
    type Output = T;
    fn index(&self, id: ThreadId) -> &Self::Output {
        self.index(id.0)
    }
}

impl<T> IndexMut<ThreadId> for [T] {
    fn index_mut(&mut self, id: ThreadId) -> &mut Self::Output {
        self.index_mut(id.0)
    }
}

impl<T> Index<ThreadId> for Vec<T> {
    type Output = T;
    fn index(&self, id: ThreadId) -> &Self::Output {
        self.index(id.0)
    }
}

impl<T> IndexMut<ThreadId> for Vec<T> {
    fn index_mut(&mut self, id: ThreadId) -> &mut Self::Output {
        self.index_mut(id.0)
    }
}

/// Globally unique (per [`EventIdGenerator`]) event identity. Ids increase in creation
/// order and serve as the total tie-break order between events.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EventId(usize);

impl EventId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Debug for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl From<EventId> for usize {
    fn from(id: EventId) -> Self {
        id.0
    }
}

impl From<usize> for EventId {
    fn from(n: usize) -> Self {
        EventId(n)
    }
}

/// Hands out monotonically increasing [`EventId`]s. Each execution owns one, so concurrent
/// explorations never share a counter.
#[derive(Clone, Debug, Default)]
pub struct EventIdGenerator {
    next: usize,
}

impl EventIdGenerator {
    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next);
        self.next += 1;
        id
    }

    pub fn peek(&self) -> EventId {
        EventId(self.next)
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }
}

/// Canonical identity of a runtime value, as assigned by an
/// [`ObjectRegistry`](crate::ObjectRegistry). Id 0 is `null`.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ObjectId(u32);

impl ObjectId {
    pub const NULL: ObjectId = ObjectId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

impl From<u32> for ObjectId {
    fn from(n: u32) -> Self {
        ObjectId(n)
    }
}

impl From<ObjectId> for u32 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}
