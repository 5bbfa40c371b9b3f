use {
    crate::{ConsistencyChecker, DerivedOrders, Inconsistency},
    std::collections::BTreeMap,
    tangle_core::{EventId, Execution},
    tracing::debug,
};

/// Read-modify-write atomicity: no two exclusive reads may read from the same write. If they
/// did, one update's write would land between the other's read and write halves.
#[derive(Clone, Debug, Default)]
pub struct AtomicityChecker {
    /// Exclusive read by the write it read from.
    claimed: BTreeMap<EventId, EventId>,
}

impl AtomicityChecker {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&mut self, execution: &Execution, read: EventId) -> Option<Inconsistency> {
        let is_exclusive = execution
            .get(read)
            .map_or(false, |e| e.label().is_exclusive_read_response());
        if !is_exclusive {
            return None;
        }
        let write = execution.reads_from(read)?;
        match self.claimed.get(&write) {
            Some(first) if *first != read => {
                let inconsistency = Inconsistency::AtomicityViolation {
                    write,
                    first: *first,
                    second: read,
                };
                debug!("{inconsistency}");
                Some(inconsistency)
            }
            _ => {
                self.claimed.insert(write, read);
                None
            }
        }
    }
}

impl ConsistencyChecker for AtomicityChecker {
    fn on_event(
        &mut self,
        execution: &Execution,
        _orders: &mut DerivedOrders,
        event: EventId,
    ) -> Option<Inconsistency> {
        self.claim(execution, event)
    }

    fn check(
        &mut self,
        execution: &Execution,
        _orders: &mut DerivedOrders,
    ) -> Option<Inconsistency> {
        self.claimed.clear();
        execution.iter().find_map(|e| self.claim(execution, e.id()))
    }

    fn reset(&mut self, execution: &Execution) -> Option<Inconsistency> {
        self.claimed.clear();
        let mut first = None;
        for event in execution.iter() {
            let found = self.claim(execution, event.id());
            first = first.or(found);
        }
        first
    }
}
