use {
    crate::{ConsistencyChecker, DerivedOrders, Inconsistency, Relation, RelationKind},
    std::collections::{BTreeMap, BTreeSet},
    tangle_core::{Event, EventId, Execution, Label, LabelKind, MemoryLocation, ThreadId},
    tracing::debug,
};

/// A cheap necessary condition for sequential consistency: the writes-before order must be
/// acyclic on every location, so that a coherence order exists.
///
/// Writes-before is kept per location and extended as events arrive. A new write has no
/// successors yet, so only a new read can close a cycle: it does exactly when the write it
/// read from reaches one of the writes the read already observes.
#[derive(Clone, Debug, Default)]
pub struct ReleaseAcquireChecker {
    locations: BTreeMap<MemoryLocation, LocationHistory>,
}

#[derive(Clone, Debug, Default)]
struct LocationHistory {
    /// Writes by thread, in program order. The initialization writes every location.
    writes: BTreeMap<ThreadId, Vec<EventId>>,
    /// Read responses by thread, in program order, with the write each read from.
    reads: BTreeMap<ThreadId, Vec<(EventId, EventId)>>,
    /// Only edges not implied by program order through other edges are stored.
    writes_before: Relation,
}

impl LocationHistory {
    fn new(init: Option<EventId>) -> Self {
        LocationHistory {
            writes: init.map(|i| (ThreadId::INIT, vec![i])).into_iter().collect(),
            ..Default::default()
        }
    }
}

/// The last element of `events` that happens before `event`. Program order makes the
/// observed elements a prefix.
fn last_observed<T: Copy>(
    execution: &Execution,
    events: &[T],
    id: impl Fn(T) -> EventId,
    event: EventId,
) -> Option<T> {
    let observed = events.partition_point(|e| execution.happens_before(id(*e), event));
    observed.checked_sub(1).map(|i| events[i])
}

impl ReleaseAcquireChecker {
    pub fn new() -> Self {
        Self::default()
    }

    fn history(
        &mut self,
        execution: &Execution,
        location: MemoryLocation,
    ) -> &mut LocationHistory {
        let init = execution.init_event().map(Event::id);
        self.locations
            .entry(location)
            .or_insert_with(|| LocationHistory::new(init))
    }

    fn add_write(&mut self, execution: &Execution, write: &Event, location: MemoryLocation) {
        let id = write.id();
        let source = write
            .label()
            .is_exclusive_write()
            .then(|| write.parent().and_then(|p| execution.reads_from(p)))
            .flatten();
        let history = self.history(execution, location);
        for writes in history.writes.values() {
            if let Some(earlier) = last_observed(execution, writes, |w| w, id) {
                history.writes_before.insert(earlier, id);
            }
        }
        for reads in history.reads.values() {
            if let Some((_, read_source)) = last_observed(execution, reads, |(r, _)| r, id) {
                history.writes_before.insert(read_source, id);
            }
        }
        if let Some(source) = source {
            history.writes_before.insert(source, id);
        }
        history.writes.entry(write.thread()).or_default().push(id);
    }

    fn add_read(
        &mut self,
        execution: &Execution,
        read: &Event,
        location: MemoryLocation,
    ) -> Option<Inconsistency> {
        let id = read.id();
        let source = execution.reads_from(id)?;
        let history = self.history(execution, location);
        let mut overwritten = BTreeSet::new();
        for writes in history.writes.values() {
            match last_observed(execution, writes, |w| w, id) {
                Some(w) if w != source => {
                    history.writes_before.insert(w, source);
                    overwritten.insert(w);
                }
                _ => {}
            }
        }
        history
            .reads
            .entry(read.thread())
            .or_default()
            .push((id, source));
        let events = history.writes_before.path(source, &overwritten)?;
        let inconsistency = Inconsistency::RelationCycle {
            relation: RelationKind::WritesBefore,
            events,
        };
        debug!("release-acquire violation at {id}: {inconsistency}");
        Some(inconsistency)
    }

    fn add(&mut self, execution: &Execution, event: EventId) -> Option<Inconsistency> {
        let event = execution.get(event)?;
        match event.label() {
            Label::WriteAccess { location, .. } => {
                self.add_write(execution, event, *location);
                None
            }
            Label::ReadAccess {
                kind: LabelKind::Response,
                location,
                ..
            } => self.add_read(execution, event, *location),
            _ => None,
        }
    }

    fn rebuild(&mut self, execution: &Execution) -> Option<Inconsistency> {
        self.locations.clear();
        let mut first = None;
        for event in execution.iter() {
            let found = self.add(execution, event.id());
            first = first.or(found);
        }
        first
    }
}

impl ConsistencyChecker for ReleaseAcquireChecker {
    fn on_event(
        &mut self,
        execution: &Execution,
        _orders: &mut DerivedOrders,
        event: EventId,
    ) -> Option<Inconsistency> {
        self.add(execution, event)
    }

    fn check(
        &mut self,
        execution: &Execution,
        _orders: &mut DerivedOrders,
    ) -> Option<Inconsistency> {
        self.rebuild(execution)
    }

    fn reset(&mut self, execution: &Execution) -> Option<Inconsistency> {
        self.rebuild(execution)
    }
}

#[cfg(test)]
mod test {
    use {super::*, tangle_core::ObjectId};

    fn x() -> MemoryLocation {
        MemoryLocation::Static(0)
    }

    struct Harness {
        execution: Execution,
        orders: DerivedOrders,
        checker: ReleaseAcquireChecker,
        init: EventId,
        found: Option<Inconsistency>,
    }

    impl Harness {
        fn new(threads: usize) -> Self {
            let mut execution = Execution::new(threads);
            let init = execution
                .add_event(
                    ThreadId::INIT,
                    Label::initialization(Default::default()),
                    vec![],
                )
                .unwrap();
            let mut harness = Harness {
                execution,
                orders: DerivedOrders::new(),
                checker: ReleaseAcquireChecker::new(),
                init,
                found: None,
            };
            for thread in 1..=threads {
                harness.add(
                    thread,
                    Label::ThreadStart {
                        kind: LabelKind::Send,
                        thread: ThreadId::from(thread),
                    },
                    vec![],
                );
            }
            harness
        }

        fn add(&mut self, thread: usize, label: Label, deps: Vec<EventId>) -> EventId {
            let id = self
                .execution
                .add_event(ThreadId::from(thread), label, deps)
                .unwrap();
            let found = self.checker.on_event(&self.execution, &mut self.orders, id);
            self.found = self.found.take().or(found);
            id
        }

        fn write(&mut self, thread: usize, value: u32) -> EventId {
            self.add(thread, Label::write(x(), ObjectId::from(value), false), vec![])
        }

        fn read(&mut self, thread: usize, from: EventId) -> EventId {
            self.add(thread, Label::read_request(x(), false), vec![]);
            let value = self.execution[from].label().written_value(&x());
            self.add(
                thread,
                Label::ReadAccess {
                    kind: LabelKind::Response,
                    location: x(),
                    value,
                    exclusive: false,
                },
                vec![from],
            )
        }
    }

    #[test]
    fn reading_an_overwritten_value_closes_a_cycle() {
        let mut h = Harness::new(2);
        let w = h.write(1, 1);
        h.read(2, w);
        assert_eq!(h.found, None);
        let init = h.init;
        h.read(2, init);
        assert_eq!(
            h.found,
            Some(Inconsistency::RelationCycle {
                relation: RelationKind::WritesBefore,
                events: vec![init, w],
            })
        );
        assert_eq!(
            h.checker.check(&h.execution, &mut h.orders),
            h.found.clone()
        );
    }

    #[test]
    fn reads_of_racing_writes_are_consistent() {
        let mut h = Harness::new(3);
        let w1 = h.write(1, 1);
        let w2 = h.write(2, 2);
        h.read(3, w1);
        h.read(3, w2);
        assert_eq!(h.found, None);
    }

    #[test]
    fn own_writes_are_never_forgotten() {
        let mut h = Harness::new(2);
        h.write(1, 1);
        let init = h.init;
        h.read(1, init);
        assert!(h.found.is_some());
    }

    #[test]
    fn program_order_adds_one_edge_per_write() {
        let mut h = Harness::new(1);
        let mut source = h.init;
        for n in 0..2000 {
            if n % 10 == 0 {
                source = h.write(1, n);
            }
            h.read(1, source);
        }
        assert_eq!(h.found, None);
        let history = &h.checker.locations[&x()];
        // The first write follows the initialization; every later one follows it and its
        // predecessor.
        assert_eq!(history.writes_before.len(), 1 + 2 * 199);
    }
}
