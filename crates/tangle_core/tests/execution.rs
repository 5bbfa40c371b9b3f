use {
    std::collections::BTreeMap,
    tangle_core::{
        Event, EventId, Execution, ExecutionFrontier, Label, LabelKind, MemoryLocation, ObjectId,
        StructuralError, ThreadId,
    },
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

fn read_response(value: ObjectId) -> Label {
    Label::ReadAccess {
        kind: LabelKind::Response,
        location: x(),
        value: Some(value),
        exclusive: false,
    }
}

/// Two threads ping-ponging writes and reads of `x`.
fn ping_pong() -> Execution {
    let mut execution = Execution::new(2);
    let mut last_write = execution
        .add_event(
            ThreadId::INIT,
            Label::initialization(BTreeMap::new()),
            vec![],
        )
        .unwrap();
    execution.add_event(t(1), start(1), vec![]).unwrap();
    execution.add_event(t(2), start(2), vec![]).unwrap();
    for round in 1..=6u32 {
        let thread = t(1 + (round as usize % 2));
        execution
            .add_event(thread, Label::read_request(x(), false), vec![])
            .unwrap();
        let observed = execution[last_write].label().written_value(&x()).unwrap();
        execution
            .add_event(thread, read_response(observed), vec![last_write])
            .unwrap();
        last_write = execution
            .add_event(thread, Label::write(x(), ObjectId::from(round), false), vec![])
            .unwrap();
    }
    execution
}

#[test]
fn clocks_observe_every_ancestor() {
    let execution = ping_pong();
    for event in execution.iter() {
        let mut ancestors: Vec<EventId> = event.parent().into_iter().collect();
        ancestors.extend_from_slice(event.dependencies());
        while let Some(ancestor) = ancestors.pop() {
            let ancestor = &execution[ancestor];
            assert!(event.observes(ancestor), "{event} must observe {ancestor}");
            assert!(event.clock() >= ancestor.clock());
            ancestors.extend(ancestor.parent());
            ancestors.extend_from_slice(ancestor.dependencies());
        }
    }
}

#[test]
fn program_order_agrees_with_predecessor_lookup() {
    let execution = ping_pong();
    for e in execution.iter() {
        for f in execution.iter() {
            let expected = e.thread() == f.thread()
                && e.position() < f.position()
                && execution.predecessor_at_distance(f.id(), f.position() - e.position())
                    == Some(e.id());
            assert_eq!(execution.program_order(e.id(), f.id()), expected);
        }
    }
}

#[test]
fn thread_event_indexes_program_order() {
    let execution = ping_pong();
    for thread in [t(1), t(2)] {
        for (position, e) in execution.thread_events(thread).enumerate() {
            assert_eq!(execution.thread_event(thread, position).map(Event::id), Some(e.id()));
        }
        let len = execution.thread_len(thread);
        assert!(execution.thread_event(thread, len).is_none());
    }
}

#[test]
fn reset_is_idempotent() {
    let mut execution = ping_pong();
    let read = execution
        .thread_events(t(1))
        .find(|e| e.label().is_read_response())
        .map(Event::id)
        .unwrap();
    let frontier: ExecutionFrontier = [(t(1), read)].into_iter().collect();

    execution.reset(&frontier);
    let once: Vec<String> = execution.iter().map(ToString::to_string).collect();
    execution.reset(&frontier);
    let twice: Vec<String> = execution.iter().map(ToString::to_string).collect();
    assert_eq!(once, twice);
    assert!(execution
        .iter()
        .all(|e| e.thread().is_init() || execution[read].observes(e)));
}

#[test]
fn reset_to_own_frontier_changes_nothing() {
    let mut execution = ping_pong();
    let before: Vec<String> = execution.iter().map(ToString::to_string).collect();
    let frontier = execution.frontier();
    execution.reset(&frontier);
    let after: Vec<String> = execution.iter().map(ToString::to_string).collect();
    assert_eq!(before, after);
}

#[test]
fn malformed_response_is_a_structural_error() {
    let mut execution = Execution::new(1);
    let init = execution
        .add_event(
            ThreadId::INIT,
            Label::initialization(BTreeMap::new()),
            vec![],
        )
        .unwrap();
    execution.add_event(t(1), start(1), vec![]).unwrap();
    let before = execution.len();

    let result = execution.add_event(t(1), read_response(ObjectId::NULL), vec![init]);
    assert!(matches!(
        result,
        Err(StructuralError::ResponseWithoutRequest { .. })
    ));
    assert_eq!(execution.len(), before);
}

#[test]
fn synchronization_is_commutative() {
    let m = ObjectId::from(1);
    let threads = |ids: &[usize]| ids.iter().map(|i| t(*i)).collect();
    let labels = vec![
        Label::initialization([(x(), ObjectId::from(5))].into_iter().collect()),
        Label::ObjectAllocation { object: m },
        Label::read_request(x(), false),
        Label::read_request(x(), true),
        Label::read_request(MemoryLocation::Static(1), false),
        read_response(ObjectId::NULL),
        Label::write(x(), ObjectId::from(2), false),
        Label::write(x(), ObjectId::from(2), true),
        Label::lock_request(m, 1, false),
        Label::lock_request(m, 2, true),
        Label::reentrant_lock(m, 2),
        Label::Unlock {
            mutex: m,
            depth: 1,
            synthetic: false,
        },
        Label::Unlock {
            mutex: m,
            depth: 2,
            synthetic: false,
        },
        Label::Wait {
            kind: LabelKind::Request,
            mutex: m,
        },
        Label::Notify {
            mutex: m,
            broadcast: false,
        },
        Label::Notify {
            mutex: ObjectId::from(2),
            broadcast: true,
        },
        Label::ThreadFork {
            forked: threads(&[1, 2]),
        },
        Label::ThreadStart {
            kind: LabelKind::Request,
            thread: t(2),
        },
        Label::ThreadFinish {
            finished: threads(&[1]),
        },
        Label::ThreadJoin {
            kind: LabelKind::Request,
            joined: threads(&[1, 3]),
        },
    ];
    let mut synchronizing_pairs = 0;
    for a in &labels {
        for b in &labels {
            let ab = a.synchronize(b);
            assert_eq!(ab, b.synchronize(a), "{a} ⊕ {b}");
            if ab.is_some() {
                synchronizing_pairs += 1;
            }
        }
    }
    assert!(synchronizing_pairs > 0);
}
