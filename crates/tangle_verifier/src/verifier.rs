use {
    crate::{
        event_structure::EventStructure,
        interleaving_tree::{Interleaving, InterleavingTree, SwitchPoints},
        TraceRecord, Visitor,
    },
    colorful::Colorful,
    consistency_model::Inconsistency,
    std::{
        collections::BTreeMap,
        panic::{catch_unwind, AssertUnwindSafe},
        time::{Duration, Instant},
    },
    tangle_core::{
        Command, EventId, MemoryLocation, ObjectId, ObjectRegistry, Outcome, Step,
        StructuralError, ThreadId, Value,
    },
    tracing::{debug, info, warn},
};

#[derive(Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[non_exhaustive]
pub enum RunResult {
    /// Every interleaving was explored without finding a failure.
    Complete,
    /// The invocation or time budget ran out first. No failure was found, but that does not
    /// mean none exists.
    Incomplete,
    Inconsistent {
        inconsistency: Inconsistency,
        trace: Vec<TraceRecord>,
    },
    Panic {
        message: String,
        minimal_trace: Vec<TraceRecord>,
    },
    /// No thread could run while some had not finished.
    Deadlock { trace: Vec<TraceRecord> },
    /// The program misused the instrumentation interface, e.g. unlocked a monitor it did not
    /// own.
    Malformed {
        error: StructuralError,
        trace: Vec<TraceRecord>,
    },
}

/// Declares the threads and shared state of the program under test. Populated anew at the
/// start of every invocation.
pub struct VerifierConfig {
    behaviors: Vec<(Box<dyn Step>, bool)>,
    registry: ObjectRegistry,
    initial_values: BTreeMap<MemoryLocation, ObjectId>,
    globals: u32,
}

impl VerifierConfig {
    fn new(cfg_fn: &dyn Fn(&mut VerifierConfig)) -> Self {
        let mut cfg = VerifierConfig {
            behaviors: Vec::new(),
            registry: ObjectRegistry::new(),
            initial_values: BTreeMap::new(),
            globals: 0,
        };
        cfg_fn(&mut cfg);
        cfg
    }

    /// Adds a thread that starts running immediately.
    pub fn spawn(&mut self, behavior: impl Step + 'static) -> ThreadId {
        self.behaviors.push((Box::new(behavior), false));
        ThreadId::from(self.behaviors.len())
    }

    /// Adds a thread that starts once another thread forks it.
    pub fn spawn_suspended(&mut self, behavior: impl Step + 'static) -> ThreadId {
        self.behaviors.push((Box::new(behavior), true));
        ThreadId::from(self.behaviors.len())
    }

    /// Registers a shared object, usable as a monitor or as the owner of fields.
    pub fn object(&mut self) -> ObjectId {
        self.registry.allocate(None)
    }

    /// Declares a global location holding `initial`.
    pub fn global(&mut self, initial: impl Into<Value>) -> MemoryLocation {
        let location = MemoryLocation::Static(self.globals);
        self.globals += 1;
        self.initialize(location, initial.into());
        location
    }

    /// Declares field `field` of `object` holding `initial`.
    pub fn field(
        &mut self,
        object: ObjectId,
        field: u32,
        initial: impl Into<Value>,
    ) -> MemoryLocation {
        let location = MemoryLocation::Field { object, field };
        self.initialize(location, initial.into());
        location
    }

    fn initialize(&mut self, location: MemoryLocation, value: Value) {
        let id = self.registry.intern(&value);
        if id.is_null() {
            self.initial_values.remove(&location);
        } else {
            self.initial_values.insert(location, id);
        }
    }
}

struct SimulatedThread {
    behavior: Box<dyn Step>,
    state: ThreadState,
}

enum ThreadState {
    /// Resumes with the outcome of its last command.
    Resume(Outcome),
    /// Issued a command that has not run yet.
    Pending(Command),
    /// Issued a request the event structure cannot answer yet.
    Blocked,
    Finished,
}

/// How one invocation ended.
enum Invocation {
    Completed(SwitchPoints),
    /// Exceeded the step budget or could not follow its interleaving.
    Aborted(SwitchPoints),
    OutOfTime,
    Failed(RunResult),
}

/// A model checker for programs built from [`Step`] instances (typically
/// [`Fiber`](tangle::Fiber)s) that share memory and monitors.
///
/// # Purpose
///
/// A typical run of a concurrent program exercises one interleaving of its threads. This
/// runtime runs the program many times ("invocations"), each under a different interleaving,
/// and records every run as an execution graph of events. Every execution is checked against
/// the memory model, so a lost update or a broken handoff is reported as an
/// [`Inconsistency`] together with the interleaving that produced it. Assertions in the
/// program are caught as panics.
///
/// # Internal Implementation Details
///
/// ```text
/// You can safely ignore this section if you only want to use the library. It is only
/// included as documentation for library contributors.
/// ```
///
/// 1. Threads only yield control to the scheduler at switch points: shared-memory accesses,
///    monitor operations, forks and joins. Everything between two switch points runs
///    atomically.
/// 2. An interleaving is a short list of (position, thread) switches. Positions count switch
///    points since the previous switch. Blocking and exiting also hand control to the
///    lowest-numbered runnable thread, which does not count as a switch.
/// 3. An interleaving tree remembers which interleavings were tried. Its nodes alternate
///    between choosing a switch position and choosing the thread to switch to, and each
///    node knows which fraction of its subtree is unexplored. New invocations descend by
///    weighted random choice, so they lean towards unexplored branches.
/// 4. The number of switches per invocation starts at one and only grows once every
///    interleaving with fewer switches was tried (iterative deepening).
/// 5. Every command becomes one or more events in an event structure, whose checkers run
///    after every event. Sequential consistency is checked once each invocation ends.
pub struct Verifier {
    #[allow(clippy::type_complexity)]
    cfg_fn: Box<dyn Fn(&mut VerifierConfig)>,
    deadline: Option<Instant>,
    event_structure: EventStructure,
    invocations: usize,
    max_steps: usize,
    running: Option<ThreadId>,
    seed: u64,
    threads: Vec<SimulatedThread>,
    time_limit: Option<Duration>,
    visitors: Vec<Box<dyn Visitor>>,
}

impl Verifier {
    pub fn new(cfg_fn: impl Fn(&mut VerifierConfig) + 'static) -> Self {
        Verifier {
            cfg_fn: Box::new(cfg_fn),
            deadline: None,
            event_structure: EventStructure::new(0),
            invocations: 10_000,
            max_steps: 10_000,
            running: None,
            seed: 0,
            threads: Vec::new(),
            time_limit: None,
            visitors: Vec::new(),
        }
    }

    /// Limits how many interleavings are tried. Defaults to 10,000.
    pub fn invocations(mut self, invocations: usize) -> Self {
        self.invocations = invocations;
        self
    }

    /// Stops exploring once `time_limit` has elapsed, also in the middle of an invocation.
    pub fn time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = Some(time_limit);
        self
    }

    /// Limits the scheduler steps of one invocation. Defaults to 10,000. Longer invocations
    /// are abandoned. Exploration still branches at the switch points they reached, but a run
    /// with abandoned invocations ends [`RunResult::Incomplete`] rather than
    /// [`RunResult::Complete`].
    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Seeds the weighted random choice between unexplored interleavings.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn visitor(mut self, visitor: impl Visitor + 'static) -> Self {
        self.visitors.push(Box::new(visitor));
        self
    }

    pub fn assert_no_panic(&mut self) {
        match self.run() {
            RunResult::Complete => (),
            RunResult::Incomplete => panic!("Too many interleavings."),
            RunResult::Panic {
                message,
                minimal_trace,
            } => {
                print_trace("Minimal trace reaching panic:", &minimal_trace);
                panic!("Panic {message:?}");
            }
            result => fail(result),
        }
    }

    pub fn assert_panic(&mut self) -> (String, Vec<TraceRecord>) {
        match self.run() {
            RunResult::Complete => panic!("Done, but expected a thread to panic."),
            RunResult::Incomplete => panic!("Too many interleavings."),
            RunResult::Panic {
                message,
                minimal_trace,
            } => (message, minimal_trace),
            result => fail(result),
        }
    }

    pub fn assert_inconsistent(&mut self) -> (Inconsistency, Vec<TraceRecord>) {
        match self.run() {
            RunResult::Complete => panic!("Done, but expected an inconsistency."),
            RunResult::Incomplete => panic!("Too many interleavings."),
            RunResult::Inconsistent {
                inconsistency,
                trace,
            } => (inconsistency, trace),
            result => fail(result),
        }
    }

    pub fn assert_deadlock(&mut self) -> Vec<TraceRecord> {
        match self.run() {
            RunResult::Complete => panic!("Done, but expected a deadlock."),
            RunResult::Incomplete => panic!("Too many interleavings."),
            RunResult::Deadlock { trace } => trace,
            result => fail(result),
        }
    }

    /// Explores interleavings until one fails, every interleaving was tried, or a budget
    /// runs out.
    pub fn run(&mut self) -> RunResult {
        self.deadline = self
            .time_limit
            .and_then(|limit| Instant::now().checked_add(limit));
        let mut tree = InterleavingTree::new(self.seed);
        let mut invocation = 0;
        let mut aborted = 0;
        while invocation < self.invocations {
            if self.out_of_time() {
                info!("time limit reached after {invocation} invocations");
                return RunResult::Incomplete;
            }
            let interleaving = match tree.next() {
                None => return exhausted(invocation, aborted),
                Some(interleaving) => interleaving,
            };
            invocation += 1;
            if debug_enabled() || invocation % 4096 == 0 {
                println!(
                    "\n=== Invocation {invocation} (at most {} switches) ===",
                    tree.max_switches()
                );
            }
            debug!("invocation {invocation} follows {interleaving}");

            let result = catch_unwind(AssertUnwindSafe(|| self.run_invocation(&interleaving)));
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = if let Some(panic) = panic.downcast_ref::<&'static str>() {
                        panic.to_string()
                    } else if let Some(panic) = panic.downcast_ref::<String>() {
                        panic.clone()
                    } else {
                        "UNKNOWN".to_string()
                    };
                    Invocation::Failed(RunResult::Panic {
                        message,
                        minimal_trace: self.minimal_trace(),
                    })
                }
            };
            let records = self.event_structure.records();
            for v in &mut self.visitors {
                v.on_maximal(records);
            }
            match outcome {
                Invocation::Completed(discovered) => {
                    if debug_enabled() {
                        print_records(records, &[]);
                    }
                    tree.commit(&interleaving, discovered);
                }
                Invocation::Aborted(discovered) => {
                    warn!("invocation {invocation} abandoned after {} events", records.len());
                    aborted += 1;
                    tree.commit(&interleaving, discovered);
                }
                Invocation::OutOfTime => {
                    info!("time limit reached during invocation {invocation}");
                    return RunResult::Incomplete;
                }
                Invocation::Failed(result) => {
                    if debug_enabled() {
                        print_records(records, &highlighted(&result, records));
                    }
                    return result;
                }
            }
            if tree.is_fully_explored() {
                return exhausted(invocation, aborted);
            }
        }
        info!("gave up after {invocation} invocations");
        RunResult::Incomplete
    }

    /// Records up to and including the last event of the running thread, restricted to
    /// those it causally depends on.
    fn minimal_trace(&self) -> Vec<TraceRecord> {
        let records = self.event_structure.records();
        let last = self
            .running
            .and_then(|t| records.iter().rev().find(|r| r.thread == t));
        match last {
            None => records.to_vec(),
            Some(last) => records
                .iter()
                .filter(|r| r.clock <= last.clock)
                .cloned()
                .collect(),
        }
    }

    fn reset_threads(&mut self) -> Result<(), StructuralError> {
        let cfg = VerifierConfig::new(&*self.cfg_fn);
        self.event_structure
            .reset(cfg.behaviors.len(), cfg.registry, cfg.initial_values)?;
        self.running = None;
        self.threads.clear();
        for (i, (behavior, suspended)) in cfg.behaviors.into_iter().enumerate() {
            let id = ThreadId::from(i + 1);
            let state = match self.event_structure.start(id, suspended)? {
                Some(outcome) => ThreadState::Resume(outcome),
                None => ThreadState::Blocked,
            };
            self.threads.push(SimulatedThread { behavior, state });
        }
        Ok(())
    }

    fn out_of_time(&self) -> bool {
        self.deadline.map_or(false, |deadline| Instant::now() >= deadline)
    }

    fn thread(&mut self, id: ThreadId) -> &mut SimulatedThread {
        &mut self.threads[id.index() - 1]
    }

    fn is_runnable(&self, id: ThreadId) -> bool {
        match self.threads[id.index() - 1].state {
            ThreadState::Resume(_) | ThreadState::Pending(_) => true,
            ThreadState::Blocked => self.event_structure.can_unblock(id),
            ThreadState::Finished => false,
        }
    }

    fn runnable_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        (1..=self.threads.len())
            .map(ThreadId::from)
            .filter(|t| self.is_runnable(*t))
    }

    fn run_invocation(&mut self, interleaving: &Interleaving) -> Invocation {
        if let Err(error) = self.reset_threads() {
            return self.malformed(error);
        }
        let mut discovered = SwitchPoints::new();
        let mut segment = 0;
        let mut position = 0;
        // The first command after a planned switch is not a switch point.
        let mut switched = false;
        let first = self.runnable_threads().next();
        let mut current = match first {
            None => return self.finish(discovered),
            Some(t) => t,
        };
        let mut steps = 0;
        loop {
            if !self.is_runnable(current) {
                let next = self.runnable_threads().next();
                current = match next {
                    Some(t) => t,
                    None => return self.finish(discovered),
                };
                debug!("forced switch to {current}");
            }
            self.running = Some(current);
            steps += 1;
            if steps > self.max_steps {
                return Invocation::Aborted(discovered);
            }
            if self.out_of_time() {
                return Invocation::OutOfTime;
            }

            let state = std::mem::replace(&mut self.thread(current).state, ThreadState::Blocked);
            let step = match state {
                ThreadState::Resume(outcome) => {
                    let command = self.thread(current).behavior.step(outcome);
                    self.thread(current).state = ThreadState::Pending(command);
                    continue;
                }
                ThreadState::Pending(command) => {
                    if is_switch_point(&command) && !switched {
                        if segment == interleaving.switch_count() {
                            let others = self.runnable_threads().filter(|t| *t != current);
                            discovered.push(others.collect());
                        } else if let Some(next) = interleaving.switch_at(segment, position) {
                            self.thread(current).state = ThreadState::Pending(command);
                            if next == current || !self.is_runnable(next) {
                                warn!("cannot switch from {current} to {next}; nondeterministic program?");
                                return Invocation::Aborted(discovered);
                            }
                            debug!("switch from {current} to {next}");
                            current = next;
                            segment += 1;
                            position = 0;
                            switched = true;
                            continue;
                        }
                        position += 1;
                    }
                    switched = false;
                    let exit = command == Command::Exit;
                    self.event_structure
                        .execute(current, &command)
                        .map(|outcome| (outcome, exit))
                }
                ThreadState::Blocked => self
                    .event_structure
                    .unblock(current)
                    .map(|outcome| (outcome, false)),
                ThreadState::Finished => {
                    self.thread(current).state = ThreadState::Finished;
                    continue;
                }
            };
            let state = match step {
                Err(error) => return self.malformed(error),
                Ok((_, true)) => ThreadState::Finished,
                Ok((Some(outcome), false)) => ThreadState::Resume(outcome),
                Ok((None, false)) => ThreadState::Blocked,
            };
            self.thread(current).state = state;
            if let Some(inconsistency) = self.event_structure.inconsistency() {
                return Invocation::Failed(RunResult::Inconsistent {
                    inconsistency: inconsistency.clone(),
                    trace: self.event_structure.records().to_vec(),
                });
            }
        }
    }

    /// Ends an invocation in which no thread can run.
    fn finish(&mut self, discovered: SwitchPoints) -> Invocation {
        let trace = self.event_structure.records().to_vec();
        let stuck = self
            .threads
            .iter()
            .any(|t| !matches!(t.state, ThreadState::Finished));
        if stuck {
            return Invocation::Failed(RunResult::Deadlock { trace });
        }
        if let Some(inconsistency) = self.event_structure.check_consistency() {
            return Invocation::Failed(RunResult::Inconsistent {
                inconsistency,
                trace,
            });
        }
        Invocation::Completed(discovered)
    }

    fn malformed(&self, error: StructuralError) -> Invocation {
        warn!("malformed execution: {error}");
        Invocation::Failed(RunResult::Malformed {
            error,
            trace: self.event_structure.records().to_vec(),
        })
    }
}

fn exhausted(invocations: usize, aborted: usize) -> RunResult {
    if aborted == 0 {
        info!("explored every interleaving in {invocations} invocations");
        RunResult::Complete
    } else {
        info!("explored every interleaving in {invocations} invocations, {aborted} of them abandoned");
        RunResult::Incomplete
    }
}

fn is_switch_point(command: &Command) -> bool {
    !matches!(command, Command::Alloc | Command::Exit)
}

fn debug_enabled() -> bool {
    std::env::var("TANGLE_DEBUG").is_ok()
}

/// Events a failure is about.
fn highlighted(result: &RunResult, records: &[TraceRecord]) -> Vec<EventId> {
    match result {
        RunResult::Inconsistent { inconsistency, .. } => inconsistency.events(),
        RunResult::Panic { minimal_trace, .. } => {
            minimal_trace.last().map(|r| r.id).into_iter().collect()
        }
        RunResult::Malformed { .. } => records.last().map(|r| r.id).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn print_records(records: &[TraceRecord], highlighted: &[EventId]) {
    for (k, r) in records.iter().enumerate() {
        let msg = format!("{k: >3}. {} {r}", r.id);
        if highlighted.contains(&r.id) {
            println!("{}", msg.color(colorful::Color::Red));
        } else {
            println!("{msg}");
        }
    }
}

fn print_trace(heading: &str, trace: &[TraceRecord]) {
    println!("{heading}");
    for (i, r) in trace.iter().enumerate() {
        println!("\t{}. {r}", i + 1);
    }
}

fn fail(result: RunResult) -> ! {
    match result {
        RunResult::Inconsistent {
            inconsistency,
            trace,
        } => {
            print_trace("Trace reaching inconsistency:", &trace);
            panic!("Inconsistent: {inconsistency}");
        }
        RunResult::Panic {
            message,
            minimal_trace,
        } => {
            print_trace("Minimal trace reaching panic:", &minimal_trace);
            panic!("Panic {message:?}");
        }
        RunResult::Deadlock { trace } => {
            print_trace("Trace reaching deadlock:", &trace);
            panic!("Deadlock");
        }
        RunResult::Malformed { error, trace } => {
            print_trace("Trace reaching malformed event:", &trace);
            panic!("Malformed: {error}");
        }
        result => panic!("Unexpected result: {result:?}"),
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{assert_trace, TraceRecordingVisitor},
        consistency_model::RelationKind,
        tangle::Fiber,
    };

    #[test]
    fn independent_threads_need_one_invocation() {
        let (visitor, traces) = TraceRecordingVisitor::new_with_replay();
        let mut verifier = Verifier::new(|cfg| {
            for _ in 0..2 {
                cfg.spawn(Fiber::new(|sdk| {
                    sdk.alloc();
                }));
            }
        })
        .visitor(visitor);
        assert_eq!(verifier.run(), RunResult::Complete);
        let traces = traces();
        assert_eq!(traces.len(), 1);
        assert_trace![
            traces[0],
            ":1@0 Start(:1)",
            ":2@0 Start(:2)",
            ":1@1 Alloc(#1)",
            ":1@2 Finish({:1})",
            ":2@1 Alloc(#2)",
            ":2@2 Finish({:2})",
        ];
    }

    #[test]
    fn finds_the_interleaving_that_breaks_an_assertion() {
        let mut verifier = Verifier::new(|cfg| {
            let x = cfg.global(0);
            cfg.spawn(Fiber::new(move |sdk| sdk.write(x, 1)));
            cfg.spawn(Fiber::new(move |sdk| {
                let first = sdk.read(x);
                let second = sdk.read(x);
                assert_eq!(first, second);
            }));
        });
        let (message, minimal_trace) = verifier.assert_panic();
        assert!(message.contains("left == right"));
        assert_trace![
            minimal_trace,
            ":1@0 Start(:1)",
            ":2@0 Start(:2)",
            ":2@1 Read^req(g0)",
            ":2@2 Read^rsp(g0, #1) = 0 ← e0",
            ":1@1 Write(g0, #2) = 1",
            ":2@3 Read^req(g0)",
            ":2@4 Read^rsp(g0, #2) = 1 ← e5",
        ];
    }

    #[test]
    fn torn_read_modify_write_is_inconsistent() {
        let mut verifier = Verifier::new(|cfg| {
            let x = cfg.global(0);
            for _ in 0..2 {
                cfg.spawn(Fiber::new(move |sdk| {
                    let n = sdk.read_exclusive(x).as_int().unwrap_or(0);
                    sdk.write_exclusive(x, n + 1);
                }));
            }
        });
        let (inconsistency, _trace) = verifier.assert_inconsistent();
        assert!(matches!(
            inconsistency,
            Inconsistency::AtomicityViolation { .. }
                | Inconsistency::RelationCycle {
                    relation: RelationKind::WritesBefore,
                    ..
                }
        ));
    }

    #[test]
    fn step_budget_leaves_the_run_incomplete() {
        let mut verifier = Verifier::new(|cfg| {
            let x = cfg.global(0);
            cfg.spawn(Fiber::new(move |sdk| loop {
                sdk.read(x);
            }));
        })
        .max_steps(100)
        .invocations(3);
        assert_eq!(verifier.run(), RunResult::Incomplete);
    }

    #[test]
    fn config_declares_initial_memory() {
        let mut verifier = Verifier::new(|cfg| {
            let node = cfg.object();
            let next = cfg.field(node, 0, node);
            let count = cfg.global(41);
            cfg.spawn(Fiber::new(move |sdk| {
                assert_eq!(sdk.read(next), Value::Object(node));
                assert_eq!(sdk.fetch_add(count, 1), 41);
                assert_eq!(sdk.read(count), Value::Int(42));
            }));
        });
        verifier.assert_no_panic();
    }
}
