use {
    std::collections::{BTreeMap, VecDeque},
    tangle_core::{Event, EventId, Execution, Label, LabelKind, MemoryLocation, ObjectId, ThreadId},
};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Monitor {
    owner: ThreadId,
    count: u32,
}

/// Abstract machine state for replaying an execution one event at a time.
///
/// Tracks the last write to every location and monitor ownership, including the FIFO queue
/// of waiting threads and which notify woke each of them.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub(crate) struct ReplayState {
    last_write: BTreeMap<MemoryLocation, EventId>,
    monitors: BTreeMap<ObjectId, Monitor>,
    last_release: BTreeMap<ObjectId, EventId>,
    waiting: BTreeMap<ObjectId, VecDeque<ThreadId>>,
    woken_by: BTreeMap<ThreadId, EventId>,
}

impl ReplayState {
    /// The write a read of `location` would observe now.
    fn visible_write(&self, location: &MemoryLocation, init: EventId) -> EventId {
        self.last_write.get(location).copied().unwrap_or(init)
    }

    fn is_free(&self, mutex: ObjectId) -> bool {
        !self.monitors.contains_key(&mutex)
    }

    fn owns(&self, thread: ThreadId, mutex: ObjectId) -> Option<u32> {
        self.monitors
            .get(&mutex)
            .filter(|m| m.owner == thread)
            .map(|m| m.count)
    }

    /// Replays `event`, returning the successor state or `None` if the event cannot happen
    /// in this state.
    pub(crate) fn replay(&self, execution: &Execution, event: &Event) -> Option<ReplayState> {
        let init = execution.init_event()?.id();
        let thread = event.thread();
        let mut next = self.clone();
        match event.label() {
            Label::Initialization { .. }
            | Label::ObjectAllocation { .. }
            | Label::ThreadFork { .. }
            | Label::ThreadStart { .. }
            | Label::ThreadFinish { .. }
            | Label::ThreadJoin { .. } => {}
            Label::ReadAccess { kind, location, .. } => {
                if *kind == LabelKind::Response {
                    let source = event.dependencies().first().copied()?;
                    if self.visible_write(location, init) != source {
                        return None;
                    }
                }
            }
            Label::WriteAccess {
                location,
                exclusive,
                ..
            } => {
                if *exclusive {
                    let read = event.parent()?;
                    let source = execution.reads_from(read)?;
                    if self.visible_write(location, init) != source {
                        return None;
                    }
                }
                next.last_write.insert(*location, event.id());
            }
            Label::Lock {
                kind, mutex, depth, ..
            } => match kind {
                LabelKind::Request => {}
                LabelKind::Response => {
                    let source = event.dependencies().first().copied()?;
                    let released = self.last_release.get(mutex).copied().unwrap_or(init);
                    if !self.is_free(*mutex) || source != released {
                        return None;
                    }
                    next.monitors.insert(
                        *mutex,
                        Monitor {
                            owner: thread,
                            count: *depth,
                        },
                    );
                }
                LabelKind::Send => {
                    if self.owns(thread, *mutex)? + 1 != *depth {
                        return None;
                    }
                    next.monitors.insert(
                        *mutex,
                        Monitor {
                            owner: thread,
                            count: *depth,
                        },
                    );
                }
            },
            Label::Unlock {
                mutex,
                depth,
                synthetic,
            } => {
                let count = self.owns(thread, *mutex)?;
                if !*synthetic && count != *depth {
                    return None;
                }
                if event.label().releases_monitor() {
                    next.monitors.remove(mutex);
                    next.last_release.insert(*mutex, event.id());
                } else if let Some(monitor) = next.monitors.get_mut(mutex) {
                    monitor.count -= 1;
                }
            }
            Label::Wait { kind, mutex } => match kind {
                LabelKind::Request => {
                    next.waiting.entry(*mutex).or_default().push_back(thread);
                }
                _ => {
                    let notify = event.dependencies().first().copied()?;
                    if self.woken_by.get(&thread) != Some(&notify) {
                        return None;
                    }
                    next.woken_by.remove(&thread);
                }
            },
            Label::Notify { mutex, broadcast } => {
                self.owns(thread, *mutex)?;
                let queue = next.waiting.entry(*mutex).or_default();
                let woken: Vec<ThreadId> = if *broadcast {
                    queue.drain(..).collect()
                } else {
                    queue.pop_front().into_iter().collect()
                };
                if queue.is_empty() {
                    next.waiting.remove(mutex);
                }
                for waiter in woken {
                    next.woken_by.insert(waiter, event.id());
                }
            }
        }
        Some(next)
    }
}

/// Per-thread count of replayed events, indexed by [`ThreadId`] (the initialization thread
/// included).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct Progress(Vec<usize>);

impl Progress {
    /// Only the initialization event is covered.
    pub(crate) fn initial(execution: &Execution) -> Self {
        let mut covered = vec![0; execution.thread_count() + 1];
        covered[0] = execution.thread_len(ThreadId::INIT);
        Progress(covered)
    }

    pub(crate) fn covers(&self, event: &Event) -> bool {
        self.0
            .get(event.thread().index())
            .map_or(false, |covered| *covered > event.position())
    }

    pub(crate) fn covered(&self) -> usize {
        self.0.iter().sum()
    }

    pub(crate) fn is_complete(&self, execution: &Execution) -> bool {
        self.0
            .iter()
            .enumerate()
            .all(|(t, covered)| *covered == execution.thread_len(ThreadId::from(t)))
    }

    /// The next event of `thread` if it can be replayed now: it is next in program order and
    /// everything it depends on is covered.
    pub(crate) fn coverable<'a>(
        &self,
        execution: &'a Execution,
        thread: ThreadId,
    ) -> Option<&'a Event> {
        let position = *self.0.get(thread.index())?;
        let event = execution.thread_event(thread, position)?;
        event
            .dependencies()
            .iter()
            .all(|d| execution.get(*d).map_or(false, |d| self.covers(d)))
            .then_some(event)
    }

    pub(crate) fn advance(&self, thread: ThreadId) -> Self {
        let mut next = self.clone();
        next.0[thread.index()] += 1;
        next
    }

    pub(crate) fn threads(&self) -> impl Iterator<Item = ThreadId> {
        (1..self.0.len()).map(ThreadId::from)
    }

    /// The first uncovered event of every thread that has one.
    pub(crate) fn pending(&self, execution: &Execution) -> Vec<EventId> {
        self.threads()
            .filter_map(|thread| execution.thread_event(thread, self.0[thread.index()]))
            .map(Event::id)
            .collect()
    }
}

/// Replays events in the given order. Returns the number of events replayed before the first
/// rejection, or `Ok(())` if every event was accepted.
pub(crate) fn replay_in_order<'a>(
    execution: &'a Execution,
    order: impl IntoIterator<Item = &'a Event>,
) -> Result<(), usize> {
    let mut state = ReplayState::default();
    let mut progress = Progress::initial(execution);
    let mut replayed = 0;
    for event in order {
        if event.thread().is_init() {
            replayed += 1;
            continue;
        }
        let accepted = progress
            .coverable(execution, event.thread())
            .filter(|next| next.id() == event.id())
            .and_then(|_| state.replay(execution, event));
        match accepted {
            Some(next) => {
                state = next;
                progress = progress.advance(event.thread());
                replayed += 1;
            }
            None => return Err(replayed),
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use {super::*, std::collections::BTreeMap};

    fn t(n: usize) -> ThreadId {
        ThreadId::from(n)
    }

    #[test]
    fn lock_needs_the_last_release() {
        let m = ObjectId::from(1);
        let mut execution = Execution::new(2);
        let init = execution
            .add_event(ThreadId::INIT, Label::initialization(BTreeMap::new()), vec![])
            .unwrap();
        let start = |n| Label::ThreadStart {
            kind: LabelKind::Send,
            thread: t(n),
        };
        let lock_response = Label::Lock {
            kind: LabelKind::Response,
            mutex: m,
            depth: 1,
            synthetic: false,
        };
        let unlock = Label::Unlock {
            mutex: m,
            depth: 1,
            synthetic: false,
        };
        execution.add_event(t(1), start(1), vec![]).unwrap();
        execution
            .add_event(t(1), Label::lock_request(m, 1, false), vec![])
            .unwrap();
        let a_lock = execution
            .add_event(t(1), lock_response.clone(), vec![init])
            .unwrap();
        let a_unlock = execution.add_event(t(1), unlock, vec![]).unwrap();
        execution.add_event(t(2), start(2), vec![]).unwrap();
        execution
            .add_event(t(2), Label::lock_request(m, 1, false), vec![])
            .unwrap();
        let b_lock = execution
            .add_event(t(2), lock_response, vec![a_unlock])
            .unwrap();

        let mut progress = Progress::initial(&execution);
        let mut state = ReplayState::default();
        // Thread 2 cannot take the lock before thread 1 released it.
        for _ in 0..2 {
            let next = progress.coverable(&execution, t(2)).unwrap();
            state = state.replay(&execution, next).unwrap();
            progress = progress.advance(t(2));
        }
        assert!(progress.coverable(&execution, t(2)).is_none());

        for _ in 0..4 {
            let next = progress.coverable(&execution, t(1)).unwrap();
            state = state.replay(&execution, next).unwrap();
            progress = progress.advance(t(1));
        }
        let next = progress.coverable(&execution, t(2)).unwrap();
        assert_eq!(next.id(), b_lock);
        assert!(state.replay(&execution, next).is_some());

        // Replaying thread 1's acquire while thread 2 holds the lock is rejected.
        let held = state.replay(&execution, next).unwrap();
        assert!(held.replay(&execution, &execution[a_lock]).is_none());
    }
}
