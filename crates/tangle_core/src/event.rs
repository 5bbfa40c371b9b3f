use {
    crate::{EventId, Label, ThreadId},
    std::fmt::{self, Display, Formatter},
    vector_clock::VectorClock,
};

/// An immutable node of an execution.
///
/// Besides its program-order `parent`, a response event records the `dependencies` it
/// synchronized with (e.g. the write a read took its value from). `clock` summarizes the
/// causal past and `jumps` is a binary-lifting table over program order.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Event {
    pub(crate) id: EventId,
    pub(crate) thread: ThreadId,
    pub(crate) position: usize,
    pub(crate) label: Label,
    pub(crate) parent: Option<EventId>,
    pub(crate) dependencies: Vec<EventId>,
    pub(crate) clock: VectorClock,
    /// `jumps[k]` is the ancestor `2^k` steps up the thread.
    pub(crate) jumps: Vec<EventId>,
}

impl Event {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// 0-based index within the thread.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn parent(&self) -> Option<EventId> {
        self.parent
    }

    pub fn dependencies(&self) -> &[EventId] {
        &self.dependencies
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Whether `other` is in this event's causal past. Every event observes itself.
    pub fn observes(&self, other: &Event) -> bool {
        self.clock.observes(other.thread.index(), other.position)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}@{} {}", self.id, self.thread, self.position, self.label)?;
        if !self.dependencies.is_empty() {
            f.write_str(" <-")?;
            for d in &self.dependencies {
                write!(f, " {d}")?;
            }
        }
        Ok(())
    }
}
