use {
    crate::TraceRecord,
    consistency_model::{CheckedExecution, Inconsistency},
    std::collections::{BTreeMap, BTreeSet, VecDeque},
    tangle_core::{
        Command, EventId, Label, LabelKind, MemoryLocation, ObjectId, ObjectRegistry, Outcome,
        StructuralError, ThreadId, ThreadSet, Value,
    },
    tracing::trace,
};

/// Why a thread cannot run. Each variant is entered by emitting a request event and left by
/// emitting the matching response.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Blocked {
    /// Spawned suspended, waiting to be forked.
    Start,
    Lock {
        mutex: ObjectId,
        depth: u32,
        synthetic: bool,
    },
    /// Waiting for a notify. `depth` is restored by the synthetic re-acquire.
    Notify { mutex: ObjectId, depth: u32 },
    Join(ThreadSet),
}

/// Translates the commands of simulated threads into events, mirroring the program's shared
/// state (latest write per location, monitor ownership, waiters) so that every response
/// synchronizes with the event it observes.
pub(crate) struct EventStructure {
    checked: CheckedExecution,
    registry: ObjectRegistry,
    records: Vec<TraceRecord>,
    last_write: BTreeMap<MemoryLocation, EventId>,
    /// Owner and hold count.
    owners: BTreeMap<ObjectId, (ThreadId, u32)>,
    last_release: BTreeMap<ObjectId, EventId>,
    waiters: BTreeMap<ObjectId, VecDeque<ThreadId>>,
    notified_by: BTreeMap<ThreadId, EventId>,
    forked_by: BTreeMap<ThreadId, EventId>,
    finished_by: BTreeMap<ThreadId, EventId>,
    blocked: BTreeMap<ThreadId, Blocked>,
}

impl EventStructure {
    pub(crate) fn new(thread_count: usize) -> Self {
        EventStructure {
            checked: CheckedExecution::new(thread_count),
            registry: ObjectRegistry::new(),
            records: Vec::new(),
            last_write: BTreeMap::new(),
            owners: BTreeMap::new(),
            last_release: BTreeMap::new(),
            waiters: BTreeMap::new(),
            notified_by: BTreeMap::new(),
            forked_by: BTreeMap::new(),
            finished_by: BTreeMap::new(),
            blocked: BTreeMap::new(),
        }
    }

    /// Starts a new invocation over `thread_count` threads with the given registry and
    /// initial memory.
    pub(crate) fn reset(
        &mut self,
        thread_count: usize,
        registry: ObjectRegistry,
        initial_values: BTreeMap<MemoryLocation, ObjectId>,
    ) -> Result<(), StructuralError> {
        if self.checked.current_execution().thread_count() == thread_count {
            self.checked.clear();
        } else {
            self.checked = CheckedExecution::new(thread_count);
        }
        self.registry = registry;
        self.records.clear();
        self.last_write.clear();
        self.owners.clear();
        self.last_release.clear();
        self.waiters.clear();
        self.notified_by.clear();
        self.forked_by.clear();
        self.finished_by.clear();
        self.blocked.clear();
        self.checked.initialize(initial_values)?;
        Ok(())
    }

    pub(crate) fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub(crate) fn inconsistency(&self) -> Option<&Inconsistency> {
        self.checked.inconsistency()
    }

    pub(crate) fn check_consistency(&mut self) -> Option<Inconsistency> {
        self.checked.check_consistency()
    }

    pub(crate) fn is_finished(&self, thread: ThreadId) -> bool {
        self.finished_by.contains_key(&thread)
    }

    pub(crate) fn is_blocked(&self, thread: ThreadId) -> bool {
        self.blocked.contains_key(&thread)
    }

    /// Emits the root event of `thread`. A suspended thread blocks until forked.
    pub(crate) fn start(
        &mut self,
        thread: ThreadId,
        suspended: bool,
    ) -> Result<Option<Outcome>, StructuralError> {
        if suspended {
            let label = Label::ThreadStart {
                kind: LabelKind::Request,
                thread,
            };
            self.add(thread, label, Vec::new())?;
            self.blocked.insert(thread, Blocked::Start);
            return Ok(None);
        }
        let label = Label::ThreadStart {
            kind: LabelKind::Send,
            thread,
        };
        self.add(thread, label, Vec::new())?;
        Ok(Some(Outcome::Started(thread)))
    }

    /// Performs `command`. Returns the outcome, or `None` if the thread blocked; see
    /// [`EventStructure::unblock`].
    pub(crate) fn execute(
        &mut self,
        thread: ThreadId,
        command: &Command,
    ) -> Result<Option<Outcome>, StructuralError> {
        trace!("{thread} executes {command}");
        match command {
            Command::Read {
                location,
                exclusive,
            } => {
                let value = self.read(thread, *location, *exclusive)?;
                Ok(Some(Outcome::Value(value)))
            }
            Command::Write {
                location,
                value,
                exclusive,
            } => {
                self.write(thread, *location, value, *exclusive)?;
                Ok(Some(Outcome::Done))
            }
            Command::CompareAndSet {
                location,
                expected,
                new,
            } => {
                let current = self.peek(*location);
                if !same_value(&current, expected) {
                    self.read(thread, *location, false)?;
                    return Ok(Some(Outcome::Success(false)));
                }
                self.read(thread, *location, true)?;
                self.write(thread, *location, new, true)?;
                Ok(Some(Outcome::Success(true)))
            }
            Command::FetchAdd { location, delta } => {
                let previous = self.peek(*location);
                let n = match previous.as_int() {
                    Some(n) => n,
                    None => panic!("fetch_add on non-numeric {location} = {previous}"),
                };
                self.read(thread, *location, true)?;
                self.write(thread, *location, &Value::Int(n + delta), true)?;
                Ok(Some(Outcome::Value(previous)))
            }
            Command::Alloc => {
                let object = self.registry.allocate(None);
                let id = self.add(thread, Label::ObjectAllocation { object }, Vec::new())?;
                self.registry.set_allocation(object, id);
                Ok(Some(Outcome::Allocated(object)))
            }
            Command::Lock(mutex) => {
                if let Some(count) = self.owned(thread, *mutex) {
                    self.add(thread, Label::reentrant_lock(*mutex, count + 1), Vec::new())?;
                    self.owners.insert(*mutex, (thread, count + 1));
                    return Ok(Some(Outcome::Done));
                }
                self.add(thread, Label::lock_request(*mutex, 1, false), Vec::new())?;
                self.blocked.insert(
                    thread,
                    Blocked::Lock {
                        mutex: *mutex,
                        depth: 1,
                        synthetic: false,
                    },
                );
                self.unblock(thread)
            }
            Command::Unlock(mutex) => {
                let count = self.owner_count(thread, *mutex)?;
                let label = Label::Unlock {
                    mutex: *mutex,
                    depth: count,
                    synthetic: false,
                };
                let id = self.add(thread, label, Vec::new())?;
                if count == 1 {
                    self.release(*mutex, id);
                } else {
                    self.owners.insert(*mutex, (thread, count - 1));
                }
                Ok(Some(Outcome::Done))
            }
            Command::Wait(mutex) => {
                let depth = self.owner_count(thread, *mutex)?;
                let label = Label::Unlock {
                    mutex: *mutex,
                    depth,
                    synthetic: true,
                };
                let id = self.add(thread, label, Vec::new())?;
                self.release(*mutex, id);
                let label = Label::Wait {
                    kind: LabelKind::Request,
                    mutex: *mutex,
                };
                self.add(thread, label, Vec::new())?;
                self.waiters.entry(*mutex).or_default().push_back(thread);
                self.blocked.insert(
                    thread,
                    Blocked::Notify {
                        mutex: *mutex,
                        depth,
                    },
                );
                Ok(None)
            }
            Command::Notify(mutex) | Command::NotifyAll(mutex) => {
                let broadcast = matches!(command, Command::NotifyAll(_));
                self.owner_count(thread, *mutex)?;
                let label = Label::Notify {
                    mutex: *mutex,
                    broadcast,
                };
                let id = self.add(thread, label, Vec::new())?;
                let queue = self.waiters.entry(*mutex).or_default();
                let woken: Vec<ThreadId> = if broadcast {
                    queue.drain(..).collect()
                } else {
                    queue.pop_front().into_iter().collect()
                };
                for waiter in woken {
                    trace!("{id} wakes {waiter}");
                    self.notified_by.insert(waiter, id);
                }
                Ok(Some(Outcome::Done))
            }
            Command::Fork(threads) => {
                for t in threads {
                    let startable = self.blocked.get(t) == Some(&Blocked::Start)
                        && !self.forked_by.contains_key(t);
                    if !startable {
                        return Err(StructuralError::IllegalFork(*t));
                    }
                }
                let forked: ThreadSet = threads.iter().copied().collect();
                let id = self.add(thread, Label::ThreadFork { forked }, Vec::new())?;
                for t in threads {
                    self.forked_by.insert(*t, id);
                }
                Ok(Some(Outcome::Done))
            }
            Command::Join(threads) => {
                let joined: ThreadSet = threads.iter().copied().collect();
                if joined.is_empty() {
                    return Ok(Some(Outcome::Done));
                }
                let label = Label::ThreadJoin {
                    kind: LabelKind::Request,
                    joined: joined.clone(),
                };
                self.add(thread, label, Vec::new())?;
                self.blocked.insert(thread, Blocked::Join(joined));
                self.unblock(thread)
            }
            Command::Exit => {
                let finished = BTreeSet::from([thread]);
                let id = self.add(thread, Label::ThreadFinish { finished }, Vec::new())?;
                self.finished_by.insert(thread, id);
                Ok(Some(Outcome::Done))
            }
        }
    }

    /// Whether a blocked thread's response could be emitted now.
    pub(crate) fn can_unblock(&self, thread: ThreadId) -> bool {
        match self.blocked.get(&thread) {
            None => true,
            Some(Blocked::Start) => self.forked_by.contains_key(&thread),
            Some(Blocked::Lock { mutex, .. }) => !self.owners.contains_key(mutex),
            Some(Blocked::Notify { mutex, .. }) => {
                self.notified_by.contains_key(&thread) && !self.owners.contains_key(mutex)
            }
            Some(Blocked::Join(joined)) => joined.iter().all(|t| self.is_finished(*t)),
        }
    }

    /// Emits the response a blocked thread is waiting for, if it is available.
    pub(crate) fn unblock(&mut self, thread: ThreadId) -> Result<Option<Outcome>, StructuralError> {
        let blocked = match self.blocked.get(&thread) {
            None => return Ok(Some(Outcome::Done)),
            Some(blocked) => blocked.clone(),
        };
        match blocked {
            Blocked::Start => {
                let Some(fork) = self.forked_by.get(&thread).copied() else {
                    return Ok(None);
                };
                let label = Label::ThreadStart {
                    kind: LabelKind::Response,
                    thread,
                };
                self.add(thread, label, vec![fork])?;
                self.blocked.remove(&thread);
                Ok(Some(Outcome::Started(thread)))
            }
            Blocked::Lock {
                mutex,
                depth,
                synthetic,
            } => {
                if self.owners.contains_key(&mutex) {
                    return Ok(None);
                }
                let released = match self.last_release.get(&mutex) {
                    Some(id) => *id,
                    None => self.init()?,
                };
                let label = Label::Lock {
                    kind: LabelKind::Response,
                    mutex,
                    depth,
                    synthetic,
                };
                self.add(thread, label, vec![released])?;
                self.owners.insert(mutex, (thread, depth));
                self.blocked.remove(&thread);
                Ok(Some(Outcome::Done))
            }
            Blocked::Notify { mutex, depth } => {
                let Some(notify) = self.notified_by.get(&thread).copied() else {
                    return Ok(None);
                };
                let label = Label::Wait {
                    kind: LabelKind::Response,
                    mutex,
                };
                self.add(thread, label, vec![notify])?;
                self.notified_by.remove(&thread);
                self.add(thread, Label::lock_request(mutex, depth, true), Vec::new())?;
                self.blocked.insert(
                    thread,
                    Blocked::Lock {
                        mutex,
                        depth,
                        synthetic: true,
                    },
                );
                self.unblock(thread)
            }
            Blocked::Join(joined) => {
                let mut finishes = Vec::with_capacity(joined.len());
                for t in &joined {
                    match self.finished_by.get(t) {
                        Some(id) => finishes.push(*id),
                        None => return Ok(None),
                    }
                }
                let label = Label::ThreadJoin {
                    kind: LabelKind::Response,
                    joined: ThreadSet::new(),
                };
                self.add(thread, label, finishes)?;
                self.blocked.remove(&thread);
                Ok(Some(Outcome::Done))
            }
        }
    }

    fn init(&self) -> Result<EventId, StructuralError> {
        self.checked
            .current_execution()
            .init_event()
            .map(|e| e.id())
            .ok_or(StructuralError::Uninitialized)
    }

    fn visible_write(&self, location: MemoryLocation) -> Result<EventId, StructuralError> {
        match self.last_write.get(&location) {
            Some(id) => Ok(*id),
            None => self.init(),
        }
    }

    /// The value a read of `location` would return now.
    fn peek(&self, location: MemoryLocation) -> Value {
        let execution = self.checked.current_execution();
        self.visible_write(location)
            .ok()
            .and_then(|w| execution.get(w))
            .and_then(|w| w.label().written_value(&location))
            .and_then(|id| self.registry.value(id))
            .unwrap_or_default()
    }

    fn read(
        &mut self,
        thread: ThreadId,
        location: MemoryLocation,
        exclusive: bool,
    ) -> Result<Value, StructuralError> {
        self.add(thread, Label::read_request(location, exclusive), Vec::new())?;
        let write = self.visible_write(location)?;
        let value = self.checked.current_execution()[write]
            .label()
            .written_value(&location);
        let label = Label::ReadAccess {
            kind: LabelKind::Response,
            location,
            value,
            exclusive,
        };
        self.add(thread, label, vec![write])?;
        Ok(value
            .and_then(|id| self.registry.value(id))
            .unwrap_or_default())
    }

    fn write(
        &mut self,
        thread: ThreadId,
        location: MemoryLocation,
        value: &Value,
        exclusive: bool,
    ) -> Result<(), StructuralError> {
        let value = self.registry.intern(value);
        let id = self.add(thread, Label::write(location, value, exclusive), Vec::new())?;
        self.last_write.insert(location, id);
        Ok(())
    }

    fn owned(&self, thread: ThreadId, mutex: ObjectId) -> Option<u32> {
        self.owners
            .get(&mutex)
            .filter(|(owner, _)| *owner == thread)
            .map(|(_, count)| *count)
    }

    fn owner_count(&self, thread: ThreadId, mutex: ObjectId) -> Result<u32, StructuralError> {
        self.owned(thread, mutex)
            .ok_or(StructuralError::IllegalMonitorState { thread, mutex })
    }

    fn release(&mut self, mutex: ObjectId, by: EventId) {
        self.owners.remove(&mutex);
        self.last_release.insert(mutex, by);
    }

    fn add(
        &mut self,
        thread: ThreadId,
        label: Label,
        dependencies: Vec<EventId>,
    ) -> Result<EventId, StructuralError> {
        let id = self.checked.add_event(thread, label, dependencies)?;
        let event = &self.checked.current_execution()[id];
        let value = match event.label() {
            Label::WriteAccess { value, .. } => Some(*value),
            label => label.read_value(),
        };
        let value = value.and_then(|v| self.registry.value(v));
        self.records.push(TraceRecord::new(event, value));
        Ok(id)
    }
}

/// Compare-and-set equality. `null` and `0` compare equal, as arithmetic treats them alike.
fn same_value(current: &Value, expected: &Value) -> bool {
    current == expected
        || matches!(
            (current, expected),
            (Value::Null, Value::Int(0)) | (Value::Int(0), Value::Null)
        )
}

#[cfg(test)]
mod test {
    use super::*;

    fn t(n: usize) -> ThreadId {
        ThreadId::from(n)
    }

    fn x() -> MemoryLocation {
        MemoryLocation::Static(0)
    }

    fn started(threads: usize, monitors: u32) -> (EventStructure, Vec<ObjectId>) {
        let mut registry = ObjectRegistry::new();
        let objects = (0..monitors).map(|_| registry.allocate(None)).collect();
        let mut es = EventStructure::new(threads);
        es.reset(threads, registry, BTreeMap::new()).unwrap();
        for n in 1..=threads {
            es.start(t(n), false).unwrap();
        }
        (es, objects)
    }

    fn labels(es: &EventStructure) -> Vec<String> {
        es.records().iter().map(|r| r.label().to_string()).collect()
    }

    #[test]
    fn reads_observe_the_latest_write() {
        let (mut es, _) = started(2, 0);
        let write = Command::Write {
            location: x(),
            value: Value::Int(5),
            exclusive: false,
        };
        assert_eq!(es.execute(t(1), &write), Ok(Some(Outcome::Done)));
        let read = Command::Read {
            location: x(),
            exclusive: false,
        };
        assert_eq!(
            es.execute(t(2), &read),
            Ok(Some(Outcome::Value(Value::Int(5))))
        );
        let last = es.records().last().unwrap();
        assert_eq!(last.dependencies(), &[es.records()[2].id()]);
        assert_eq!(last.value(), Some(&Value::Int(5)));
    }

    #[test]
    fn compare_and_set_on_null_counts_as_zero() {
        let (mut es, _) = started(1, 0);
        let cas = Command::CompareAndSet {
            location: x(),
            expected: Value::Int(0),
            new: Value::Int(1),
        };
        assert_eq!(es.execute(t(1), &cas), Ok(Some(Outcome::Success(true))));
        assert_eq!(es.execute(t(1), &cas), Ok(Some(Outcome::Success(false))));
        assert!(es.check_consistency().is_none());
    }

    #[test]
    fn contended_lock_blocks_until_released() {
        let (mut es, objects) = started(2, 1);
        let m = objects[0];
        assert_eq!(es.execute(t(1), &Command::Lock(m)), Ok(Some(Outcome::Done)));
        assert_eq!(es.execute(t(1), &Command::Lock(m)), Ok(Some(Outcome::Done)));
        assert_eq!(es.execute(t(2), &Command::Lock(m)), Ok(None));
        assert!(!es.can_unblock(t(2)));
        es.execute(t(1), &Command::Unlock(m)).unwrap();
        assert!(!es.can_unblock(t(2)));
        es.execute(t(1), &Command::Unlock(m)).unwrap();
        assert!(es.can_unblock(t(2)));
        assert_eq!(es.unblock(t(2)), Ok(Some(Outcome::Done)));
        assert!(!es.is_blocked(t(2)));
        assert!(es.check_consistency().is_none());
    }

    #[test]
    fn wait_releases_and_reacquires_at_the_same_depth() {
        let (mut es, objects) = started(2, 1);
        let m = objects[0];
        es.execute(t(1), &Command::Lock(m)).unwrap();
        es.execute(t(1), &Command::Lock(m)).unwrap();
        assert_eq!(es.execute(t(1), &Command::Wait(m)), Ok(None));
        es.execute(t(2), &Command::Lock(m)).unwrap();
        es.execute(t(2), &Command::Notify(m)).unwrap();
        assert!(!es.can_unblock(t(1)));
        es.execute(t(2), &Command::Unlock(m)).unwrap();
        assert_eq!(es.unblock(t(1)), Ok(Some(Outcome::Done)));
        // Both reentrant holds must be released again.
        es.execute(t(1), &Command::Unlock(m)).unwrap();
        es.execute(t(1), &Command::Unlock(m)).unwrap();
        assert_eq!(
            es.execute(t(1), &Command::Unlock(m)),
            Err(StructuralError::IllegalMonitorState {
                thread: t(1),
                mutex: m
            })
        );
        assert!(labels(&es).contains(&"Lock*^rsp(#1)".to_string()));
        assert!(es.check_consistency().is_none());
    }

    #[test]
    fn notify_without_waiters_is_lost() {
        let (mut es, objects) = started(2, 1);
        let m = objects[0];
        es.execute(t(2), &Command::Lock(m)).unwrap();
        es.execute(t(2), &Command::Notify(m)).unwrap();
        es.execute(t(2), &Command::Unlock(m)).unwrap();
        es.execute(t(1), &Command::Lock(m)).unwrap();
        assert_eq!(es.execute(t(1), &Command::Wait(m)), Ok(None));
        assert!(!es.can_unblock(t(1)));
    }

    #[test]
    fn every_command_gets_an_answer() {
        let (mut es, objects) = started(1, 1);
        let m = objects[0];
        let write = Command::Write {
            location: x(),
            value: Value::Int(1),
            exclusive: false,
        };
        let fetch_add = Command::FetchAdd {
            location: x(),
            delta: 2,
        };
        assert_eq!(es.execute(t(1), &write), Ok(Some(Outcome::Done)));
        assert_eq!(
            es.execute(t(1), &fetch_add),
            Ok(Some(Outcome::Value(Value::Int(1))))
        );
        assert!(matches!(
            es.execute(t(1), &Command::Alloc),
            Ok(Some(Outcome::Allocated(_)))
        ));
        for command in [
            Command::Lock(m),
            Command::Notify(m),
            Command::NotifyAll(m),
            Command::Unlock(m),
            Command::Exit,
        ] {
            assert_eq!(es.execute(t(1), &command), Ok(Some(Outcome::Done)), "{command}");
        }
        assert!(es.check_consistency().is_none());
    }

    #[test]
    fn join_waits_for_every_thread() {
        let mut es = EventStructure::new(3);
        es.reset(3, ObjectRegistry::new(), BTreeMap::new()).unwrap();
        es.start(t(1), false).unwrap();
        assert_eq!(es.start(t(2), true), Ok(None));
        assert_eq!(es.start(t(3), true), Ok(None));
        es.execute(t(1), &Command::Fork(vec![t(2), t(3)])).unwrap();
        assert_eq!(es.unblock(t(2)), Ok(Some(Outcome::Started(t(2)))));
        assert_eq!(
            es.execute(t(1), &Command::Join(vec![t(2), t(3)])),
            Ok(None)
        );
        es.execute(t(2), &Command::Exit).unwrap();
        assert!(!es.can_unblock(t(1)));
        es.unblock(t(3)).unwrap();
        es.execute(t(3), &Command::Exit).unwrap();
        assert_eq!(es.unblock(t(1)), Ok(Some(Outcome::Done)));
        assert_eq!(
            es.execute(t(1), &Command::Fork(vec![t(2)])),
            Err(StructuralError::IllegalFork(t(2)))
        );
    }

    #[test]
    fn unlocking_a_foreign_monitor_is_malformed() {
        let (mut es, objects) = started(2, 1);
        let m = objects[0];
        es.execute(t(1), &Command::Lock(m)).unwrap();
        assert_eq!(
            es.execute(t(2), &Command::Unlock(m)),
            Err(StructuralError::IllegalMonitorState {
                thread: t(2),
                mutex: m
            })
        );
    }
}
