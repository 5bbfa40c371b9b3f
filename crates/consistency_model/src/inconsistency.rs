use {
    std::fmt::{self, Display, Formatter},
    tangle_core::EventId,
    thiserror::Error,
};

/// The derived orders the checkers reason about.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RelationKind {
    ReadModifyWrite,
    WritesBefore,
    Coherence,
    ExtendedCoherence,
    SequentialConsistency,
    ExecutionOrder,
}

impl Display for RelationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationKind::ReadModifyWrite => "read-modify-write",
            RelationKind::WritesBefore => "writes-before",
            RelationKind::Coherence => "coherence",
            RelationKind::ExtendedCoherence => "extended-coherence",
            RelationKind::SequentialConsistency => "sequential-consistency",
            RelationKind::ExecutionOrder => "execution",
        })
    }
}

/// Why an execution cannot have happened under the checked memory model.
///
/// Returned as a value: finding one is an expected outcome of the search.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[non_exhaustive]
pub enum Inconsistency {
    /// Two exclusive reads took their value from the same write, so one of the two atomic
    /// updates was interleaved with the other.
    #[error("exclusive reads {first} and {second} both read from {write}")]
    AtomicityViolation {
        write: EventId,
        first: EventId,
        second: EventId,
    },
    #[error("{relation} order has a cycle through {events:?}")]
    RelationCycle {
        relation: RelationKind,
        events: Vec<EventId>,
    },
    /// No interleaving of the threads replays every event. `covered` is the longest
    /// replayable prefix found and `pending` the events that prefix could not replay next.
    #[error(
        "no sequentially consistent replay exists; longest replay covered {covered} events \
         and stopped before {pending:?}"
    )]
    SequentialConsistencyViolation {
        covered: usize,
        pending: Vec<EventId>,
    },
}

impl Inconsistency {
    /// Events to highlight when reporting.
    pub fn events(&self) -> Vec<EventId> {
        match self {
            Inconsistency::AtomicityViolation {
                write,
                first,
                second,
            } => vec![*write, *first, *second],
            Inconsistency::RelationCycle { events, .. } => events.clone(),
            Inconsistency::SequentialConsistencyViolation { pending, .. } => pending.clone(),
        }
    }
}
