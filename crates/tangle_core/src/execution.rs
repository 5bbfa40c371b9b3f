use {
    crate::{Event, EventId, EventIdGenerator, Label, LabelKind, StructuralError, ThreadId},
    std::{
        collections::BTreeMap,
        ops::Index,
    },
    tracing::trace,
    vector_clock::VectorClock,
};

/// Per-thread snapshot of the last event, describing a causally closed prefix of an
/// [`Execution`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExecutionFrontier(BTreeMap<ThreadId, EventId>);

impl ExecutionFrontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread: ThreadId) -> Option<EventId> {
        self.0.get(&thread).copied()
    }

    pub fn set(&mut self, thread: ThreadId, event: EventId) {
        self.0.insert(thread, event);
    }

    pub fn remove(&mut self, thread: ThreadId) -> Option<EventId> {
        self.0.remove(&thread)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, EventId)> + '_ {
        self.0.iter().map(|(t, e)| (*t, *e))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ThreadId, EventId)> for ExecutionFrontier {
    fn from_iter<I: IntoIterator<Item = (ThreadId, EventId)>>(iter: I) -> Self {
        ExecutionFrontier(iter.into_iter().collect())
    }
}

/// Owns every event of one invocation.
///
/// Events live in an arena indexed by [`EventId`]; parents, dependencies and frontier entries
/// are ids into that arena. Thread [`ThreadId::INIT`] holds only the initialization event and
/// program threads are numbered `1..=thread_count`.
///
/// Every event's parent and dependencies are already members (causal closure), which also
/// makes id order a linearization of the causality order.
#[derive(Clone, Debug)]
pub struct Execution {
    events: Vec<Option<Event>>,
    threads: Vec<Vec<EventId>>,
    generator: EventIdGenerator,
}

impl Execution {
    pub fn new(thread_count: usize) -> Self {
        Execution {
            events: Vec::new(),
            threads: vec![Vec::new(); thread_count + 1],
            generator: EventIdGenerator::default(),
        }
    }

    /// Number of program threads (excluding the initialization thread).
    pub fn thread_count(&self) -> usize {
        self.threads.len() - 1
    }

    /// Starts tracking another program thread and returns its id.
    pub fn add_thread(&mut self) -> ThreadId {
        self.threads.push(Vec::new());
        ThreadId::from(self.threads.len() - 1)
    }

    pub fn is_tracked(&self, thread: ThreadId) -> bool {
        !thread.is_init() && thread.index() < self.threads.len()
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.get(id).is_some()
    }

    pub fn init_event(&self) -> Option<&Event> {
        self.threads[ThreadId::INIT]
            .first()
            .and_then(|id| self.get(*id))
    }

    pub fn thread_events(&self, thread: ThreadId) -> impl Iterator<Item = &Event> + '_ {
        self.threads
            .get(thread.index())
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
    }

    /// The event at `position` in `thread`'s program order.
    pub fn thread_event(&self, thread: ThreadId, position: usize) -> Option<&Event> {
        let id = self.threads.get(thread.index())?.get(position)?;
        self.get(*id)
    }

    pub fn thread_len(&self, thread: ThreadId) -> usize {
        self.threads.get(thread.index()).map_or(0, Vec::len)
    }

    pub fn last_event(&self, thread: ThreadId) -> Option<&Event> {
        self.threads
            .get(thread.index())
            .and_then(|events| events.last())
            .and_then(|id| self.get(*id))
    }

    /// Every event in creation order, which is consistent with causality.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.threads.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.iter().all(Vec::is_empty)
    }

    /// Builds (but does not append) the next event of `thread`. Fails without side effects if
    /// the event would break a structural invariant.
    pub fn create_event(
        &mut self,
        thread: ThreadId,
        label: Label,
        dependencies: Vec<EventId>,
    ) -> Result<Event, StructuralError> {
        if thread.is_init() {
            if !label.is_initialization() {
                return Err(StructuralError::InitThread);
            }
            if !self.threads[ThreadId::INIT].is_empty() {
                return Err(StructuralError::AlreadyInitialized);
            }
        } else {
            if !self.is_tracked(thread) {
                return Err(StructuralError::UntrackedThread(thread));
            }
            if label.is_initialization() {
                return Err(StructuralError::InitThread);
            }
        }
        let init_clock = if thread.is_init() {
            VectorClock::new()
        } else {
            self.init_event()
                .ok_or(StructuralError::Uninitialized)?
                .clock
                .clone()
        };

        let parent = self.last_event(thread);
        self.check_label(thread, &label, parent)?;

        let mut deps = Vec::with_capacity(dependencies.len());
        for id in &dependencies {
            deps.push(self.get(*id).ok_or(StructuralError::UnknownEvent(*id))?);
        }
        if label.is_response() {
            // Guarded by `check_label`.
            let request = parent.ok_or_else(|| StructuralError::ResponseWithoutRequest {
                thread,
                label: label.clone(),
            })?;
            for dep in &deps {
                if dep.id == request.id || dep.observes(request) {
                    return Err(StructuralError::CausalCycle(dep.id));
                }
            }
            let justified = request
                .label
                .synchronize_all(deps.iter().map(|d| &d.label));
            if justified.as_ref() != Some(&label) {
                return Err(StructuralError::UnjustifiedResponse { response: label });
            }
        } else if !deps.is_empty() {
            return Err(StructuralError::UnexpectedDependencies(label));
        }

        let position = parent.map_or(0, |p| p.position + 1);
        let mut clock = parent.map_or(init_clock, |p| p.clock.clone());
        for dep in &deps {
            clock.merge_in(&dep.clock);
        }
        clock.increment(thread.index());

        let mut jumps = Vec::new();
        if let Some(parent) = parent {
            jumps.push(parent.id);
            let mut k = 0;
            while let Some(up) = self
                .get(jumps[k])
                .and_then(|ancestor| ancestor.jumps.get(k))
                .copied()
            {
                jumps.push(up);
                k += 1;
            }
        }
        let parent = parent.map(|p| p.id);

        Ok(Event {
            id: self.generator.next_id(),
            thread,
            position,
            label,
            parent,
            dependencies,
            clock,
            jumps,
        })
    }

    fn check_label(
        &self,
        thread: ThreadId,
        label: &Label,
        parent: Option<&Event>,
    ) -> Result<(), StructuralError> {
        match (parent, label.kind()) {
            (Some(parent), LabelKind::Response) if parent.label.is_request() => {
                if !label.is_response_to(&parent.label) {
                    return Err(StructuralError::MismatchedResponse {
                        request: parent.label.clone(),
                        response: label.clone(),
                    });
                }
            }
            (_, LabelKind::Response) => {
                return Err(StructuralError::ResponseWithoutRequest {
                    thread,
                    label: label.clone(),
                })
            }
            (Some(parent), _) if parent.label.is_request() => {
                return Err(StructuralError::PendingRequest {
                    thread,
                    request: parent.label.clone(),
                    label: label.clone(),
                })
            }
            _ => {}
        }

        if let Label::WriteAccess {
            location,
            exclusive: true,
            ..
        } = label
        {
            let paired = parent.map_or(false, |p| {
                p.label.is_exclusive_read_response() && p.label.location() == Some(*location)
            });
            if !paired {
                return Err(StructuralError::UnpairedExclusiveWrite(*location));
            }
        }

        match label {
            Label::ThreadFork { forked } => {
                for t in forked {
                    if !self.is_tracked(*t) || *t == thread {
                        return Err(StructuralError::IllegalFork(*t));
                    }
                }
            }
            Label::ThreadJoin { joined, .. } => {
                for t in joined {
                    if !self.is_tracked(*t) || *t == thread {
                        return Err(StructuralError::IllegalJoin(*t));
                    }
                }
            }
            Label::ThreadStart { thread: t, .. } if *t != thread => {
                return Err(StructuralError::UntrackedThread(*t));
            }
            Label::ThreadFinish { finished } => {
                for t in finished {
                    if !self.is_tracked(*t) {
                        return Err(StructuralError::UntrackedThread(*t));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Appends an event built by [`Execution::create_event`].
    pub fn append(&mut self, event: Event) -> Result<EventId, StructuralError> {
        let last = self.last_event(event.thread).map(|e| e.id);
        if last != event.parent || self.contains(event.id) {
            return Err(StructuralError::StaleEvent(event.id));
        }
        let id = event.id;
        if self.events.len() <= id.index() {
            self.events.resize(id.index() + 1, None);
        }
        self.threads[event.thread].push(id);
        trace!("append {event}");
        self.events[id.index()] = Some(event);
        Ok(id)
    }

    /// Creates and appends in one step.
    pub fn add_event(
        &mut self,
        thread: ThreadId,
        label: Label,
        dependencies: Vec<EventId>,
    ) -> Result<EventId, StructuralError> {
        let event = self.create_event(thread, label, dependencies)?;
        self.append(event)
    }

    /// Whether `a` causally precedes `b` (strictly).
    pub fn happens_before(&self, a: EventId, b: EventId) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(a), Some(b)) => a.id != b.id && b.observes(a),
            _ => false,
        }
    }

    /// The `n`-th program-order predecessor of `event`, in `O(log n)` via the jump table.
    pub fn predecessor_at_distance(&self, event: EventId, mut n: usize) -> Option<EventId> {
        let mut current = self.get(event)?;
        let mut k = 0;
        while n > 0 {
            if n & 1 == 1 {
                current = self.get(*current.jumps.get(k)?)?;
            }
            n >>= 1;
            k += 1;
        }
        Some(current.id)
    }

    /// Whether `a` precedes `b` on the same thread.
    pub fn program_order(&self, a: EventId, b: EventId) -> bool {
        match (self.get(a), self.get(b)) {
            (Some(ea), Some(eb)) if ea.thread == eb.thread && ea.position < eb.position => {
                self.predecessor_at_distance(b, eb.position - ea.position) == Some(a)
            }
            _ => false,
        }
    }

    /// The write (or initialization) a read response took its value from.
    pub fn reads_from(&self, read: EventId) -> Option<EventId> {
        let event = self.get(read)?;
        if event.label.is_read_response() {
            event.dependencies.first().copied()
        } else {
            None
        }
    }

    /// Events a pending request could synchronize with. Candidates that already observe the
    /// request would close a causal cycle and are left out.
    pub fn synchronization_candidates(&self, request: EventId) -> Vec<EventId> {
        let Some(request) = self.get(request).filter(|r| r.label.is_request()) else {
            return Vec::new();
        };
        self.iter()
            .filter(|candidate| candidate.label.synchronize(&request.label).is_some())
            .filter(|candidate| {
                let cyclic = candidate.id == request.id || candidate.observes(request);
                if cyclic {
                    trace!("rejecting {} for {}: causal cycle", candidate.id, request.id);
                }
                !cyclic
            })
            .map(|candidate| candidate.id)
            .collect()
    }

    pub fn frontier(&self) -> ExecutionFrontier {
        self.threads
            .iter()
            .enumerate()
            .filter_map(|(t, events)| events.last().map(|e| (ThreadId::from(t), *e)))
            .collect()
    }

    /// Keeps exactly the causal closure of `frontier` plus the initialization event.
    pub fn reset(&mut self, frontier: &ExecutionFrontier) {
        let mut keep = vec![0usize; self.threads.len()];
        if let Some(events) = self.threads.first() {
            keep[0] = events.len().min(1);
        }
        for (_, id) in frontier.iter() {
            if let Some(event) = self.get(id) {
                for (t, kept) in keep.iter_mut().enumerate() {
                    *kept = (*kept).max(event.clock.get(t) as usize);
                }
            }
        }
        for (t, events) in self.threads.iter_mut().enumerate() {
            let cut = keep[t].min(events.len());
            for id in events.drain(cut..) {
                self.events[id.index()] = None;
            }
        }
        trace!("reset to {} events", self.len());
    }

    /// Drops every event, including the initialization, and restarts id generation.
    pub fn clear(&mut self) {
        self.events.clear();
        self.threads.iter_mut().for_each(Vec::clear);
        self.generator.reset();
    }
}

impl Index<EventId> for Execution {
    type Output = Event;

    fn index(&self, id: EventId) -> &Self::Output {
        match self.get(id) {
            Some(event) => event,
            None => panic!("{id} is not part of this execution"),
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{MemoryLocation, ObjectId},
    };

    fn t(n: usize) -> ThreadId {
        ThreadId::from(n)
    }

    fn x() -> MemoryLocation {
        MemoryLocation::Static(0)
    }

    fn start(thread: usize) -> Label {
        Label::ThreadStart {
            kind: LabelKind::Send,
            thread: t(thread),
        }
    }

    fn initialized(threads: usize) -> (Execution, EventId) {
        let mut execution = Execution::new(threads);
        let init = execution
            .add_event(ThreadId::INIT, Label::initialization(BTreeMap::new()), vec![])
            .unwrap();
        (execution, init)
    }

    fn read(execution: &mut Execution, thread: usize, from: EventId) -> EventId {
        execution
            .add_event(t(thread), Label::read_request(x(), false), vec![])
            .unwrap();
        let value = execution[from].label().written_value(&x());
        execution
            .add_event(
                t(thread),
                Label::ReadAccess {
                    kind: LabelKind::Response,
                    location: x(),
                    value,
                    exclusive: false,
                },
                vec![from],
            )
            .unwrap()
    }

    #[test]
    fn computes_positions_and_clocks() {
        let (mut execution, init) = initialized(2);
        let a = execution.add_event(t(1), start(1), vec![]).unwrap();
        let w = execution
            .add_event(t(1), Label::write(x(), ObjectId::from(1), false), vec![])
            .unwrap();
        execution.add_event(t(2), start(2), vec![]).unwrap();
        let r = read(&mut execution, 2, w);

        assert_eq!(execution[w].position(), 1);
        assert_eq!(execution[w].parent(), Some(a));
        assert!(execution.happens_before(init, a));
        assert!(execution.happens_before(w, r));
        assert!(!execution.happens_before(r, w));
        assert!(!execution.happens_before(w, w));
        assert_eq!(execution.reads_from(r), Some(w));
        // Every ancestor is observed and clocks only grow along program order.
        for event in execution.iter() {
            if let Some(parent) = event.parent() {
                assert!(event.clock() >= execution[parent].clock());
                assert!(event.observes(&execution[parent]));
            }
        }
    }

    #[test]
    fn program_order_agrees_with_jump_table() {
        let (mut execution, _) = initialized(2);
        let mut ids = vec![execution.add_event(t(1), start(1), vec![]).unwrap()];
        for i in 0..20 {
            ids.push(
                execution
                    .add_event(t(1), Label::write(x(), ObjectId::from(i), false), vec![])
                    .unwrap(),
            );
        }
        let other = execution.add_event(t(2), start(2), vec![]).unwrap();
        for (i, a) in ids.iter().enumerate() {
            for (j, b) in ids.iter().enumerate() {
                assert_eq!(execution.program_order(*a, *b), i < j);
            }
            assert_eq!(execution.predecessor_at_distance(ids[20], 20 - i), Some(*a));
            assert!(!execution.program_order(*a, other));
        }
        assert_eq!(execution.predecessor_at_distance(ids[3], 4), None);
    }

    #[test]
    fn rejects_response_without_matching_request() {
        let (mut execution, init) = initialized(1);
        execution.add_event(t(1), start(1), vec![]).unwrap();
        let response = Label::ReadAccess {
            kind: LabelKind::Response,
            location: x(),
            value: Some(ObjectId::NULL),
            exclusive: false,
        };
        assert!(matches!(
            execution.create_event(t(1), response.clone(), vec![init]),
            Err(StructuralError::ResponseWithoutRequest { .. })
        ));

        execution
            .add_event(t(1), Label::lock_request(ObjectId::from(1), 1, false), vec![])
            .unwrap();
        assert!(matches!(
            execution.create_event(t(1), response, vec![init]),
            Err(StructuralError::MismatchedResponse { .. })
        ));
        assert!(matches!(
            execution.create_event(t(1), start(1), vec![]),
            Err(StructuralError::PendingRequest { .. })
        ));
    }

    #[test]
    fn rejects_unjustified_response() {
        let (mut execution, _) = initialized(2);
        execution.add_event(t(1), start(1), vec![]).unwrap();
        let w = execution
            .add_event(t(1), Label::write(x(), ObjectId::from(1), false), vec![])
            .unwrap();
        execution.add_event(t(2), start(2), vec![]).unwrap();
        execution
            .add_event(t(2), Label::read_request(x(), false), vec![])
            .unwrap();
        let lie = Label::ReadAccess {
            kind: LabelKind::Response,
            location: x(),
            value: Some(ObjectId::from(2)),
            exclusive: false,
        };
        assert!(matches!(
            execution.create_event(t(2), lie, vec![w]),
            Err(StructuralError::UnjustifiedResponse { .. })
        ));
    }

    #[test]
    fn rejects_unpaired_exclusive_write() {
        let (mut execution, _) = initialized(1);
        execution.add_event(t(1), start(1), vec![]).unwrap();
        assert_eq!(
            execution
                .create_event(t(1), Label::write(x(), ObjectId::from(1), true), vec![])
                .unwrap_err(),
            StructuralError::UnpairedExclusiveWrite(x())
        );
    }

    #[test]
    fn rejects_untracked_threads() {
        let (mut execution, _) = initialized(1);
        assert_eq!(
            execution.create_event(t(3), start(3), vec![]).unwrap_err(),
            StructuralError::UntrackedThread(t(3))
        );
        execution.add_event(t(1), start(1), vec![]).unwrap();
        let fork = Label::ThreadFork {
            forked: [t(2)].into_iter().collect(),
        };
        assert_eq!(
            execution.create_event(t(1), fork, vec![]).unwrap_err(),
            StructuralError::IllegalFork(t(2))
        );
    }

    #[test]
    fn requires_initialization_first() {
        let mut execution = Execution::new(1);
        assert_eq!(
            execution.create_event(t(1), start(1), vec![]).unwrap_err(),
            StructuralError::Uninitialized
        );
    }

    #[test]
    fn lists_candidates_without_cycles() {
        let (mut execution, init) = initialized(2);
        execution.add_event(t(1), start(1), vec![]).unwrap();
        let w = execution
            .add_event(t(1), Label::write(x(), ObjectId::from(1), false), vec![])
            .unwrap();
        execution.add_event(t(2), start(2), vec![]).unwrap();
        let request = execution
            .add_event(t(2), Label::read_request(x(), false), vec![])
            .unwrap();
        assert_eq!(execution.synchronization_candidates(request), vec![init, w]);
    }

    #[test]
    fn reset_keeps_the_causal_closure() {
        let (mut execution, init) = initialized(2);
        let a = execution.add_event(t(1), start(1), vec![]).unwrap();
        let w = execution
            .add_event(t(1), Label::write(x(), ObjectId::from(1), false), vec![])
            .unwrap();
        let w2 = execution
            .add_event(t(1), Label::write(x(), ObjectId::from(2), false), vec![])
            .unwrap();
        execution.add_event(t(2), start(2), vec![]).unwrap();
        let r = read(&mut execution, 2, w);
        execution.add_event(t(2), Label::write(x(), ObjectId::from(3), false), vec![]).unwrap();

        let frontier: ExecutionFrontier = [(t(2), r)].into_iter().collect();
        execution.reset(&frontier);
        let kept: Vec<_> = execution.iter().map(Event::id).collect();
        assert!(kept.contains(&init) && kept.contains(&a) && kept.contains(&w));
        assert!(kept.contains(&r));
        assert!(!execution.contains(w2));
        assert_eq!(execution.last_event(t(1)).map(Event::id), Some(w));
        assert_eq!(execution.frontier().get(t(2)), Some(r));

        execution.reset(&frontier);
        let again: Vec<_> = execution.iter().map(Event::id).collect();
        assert_eq!(kept, again);

        // Appending after a reset continues from the kept prefix.
        let next = execution
            .add_event(t(1), Label::write(x(), ObjectId::from(4), false), vec![])
            .unwrap();
        assert_eq!(execution[next].parent(), Some(w));
    }

    #[test]
    fn append_rejects_stale_events() {
        let (mut execution, _) = initialized(1);
        let first = execution.create_event(t(1), start(1), vec![]).unwrap();
        let second = execution.create_event(t(1), start(1), vec![]).unwrap();
        execution.append(first).unwrap();
        assert!(matches!(
            execution.append(second),
            Err(StructuralError::StaleEvent(_))
        ));
    }
}
