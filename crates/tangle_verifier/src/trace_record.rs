use {
    std::fmt::{Display, Formatter},
    tangle_core::{Event, EventId, Label, ThreadId, Value},
    vector_clock::VectorClock,
};

/// One event of an invocation, as reported to visitors and in failure results.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TraceRecord {
    pub(crate) id: EventId,
    pub(crate) thread: ThreadId,
    pub(crate) position: usize,
    pub(crate) label: Label,
    pub(crate) dependencies: Vec<EventId>,
    pub(crate) clock: VectorClock,
    /// The runtime value read or written, resolved through the registry.
    pub(crate) value: Option<Value>,
}

impl TraceRecord {
    pub(crate) fn new(event: &Event, value: Option<Value>) -> Self {
        TraceRecord {
            id: event.id(),
            thread: event.thread(),
            position: event.position(),
            label: event.label().clone(),
            dependencies: event.dependencies().to_vec(),
            clock: event.clock().clone(),
            value,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn dependencies(&self) -> &[EventId] {
        &self.dependencies
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

impl Display for TraceRecord {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(formatter, "{}@{} {}", self.thread, self.position, self.label)?;
        if let Some(value) = &self.value {
            write!(formatter, " = {value}")?;
        }
        if !self.dependencies.is_empty() {
            write!(formatter, " ←")?;
            for dependency in &self.dependencies {
                write!(formatter, " {dependency}")?;
            }
        }
        Ok(())
    }
}
