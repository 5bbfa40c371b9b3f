use {
    crate::{
        AtomicityChecker, ConsistencyChecker, DerivedOrders, Inconsistency, ReleaseAcquireChecker,
        SequentialConsistencyChecker,
    },
    std::collections::BTreeMap,
    tangle_core::{
        EventId, Execution, ExecutionFrontier, Label, MemoryLocation, ObjectId, StructuralError,
        ThreadId,
    },
    tracing::{debug, warn},
};

/// An [`Execution`] together with its derived orders and the checkers that watch it.
///
/// Incremental checkers see every appended event; the first inconsistency they report is
/// kept until the next reset. [`CheckedExecution::check_consistency`] additionally runs the
/// full checks.
pub struct CheckedExecution {
    execution: Execution,
    orders: DerivedOrders,
    checkers: Vec<Box<dyn ConsistencyChecker>>,
    inconsistency: Option<Inconsistency>,
}

impl CheckedExecution {
    /// Checks atomicity and release-acquire incrementally and sequential consistency in full.
    pub fn new(thread_count: usize) -> Self {
        Self::with_checkers(
            thread_count,
            vec![
                Box::new(AtomicityChecker::new()),
                Box::new(ReleaseAcquireChecker::new()),
                Box::new(SequentialConsistencyChecker::new()),
            ],
        )
    }

    pub fn with_checkers(
        thread_count: usize,
        checkers: Vec<Box<dyn ConsistencyChecker>>,
    ) -> Self {
        CheckedExecution {
            execution: Execution::new(thread_count),
            orders: DerivedOrders::new(),
            checkers,
            inconsistency: None,
        }
    }

    /// Adds the initialization event.
    pub fn initialize(
        &mut self,
        initial_values: BTreeMap<MemoryLocation, ObjectId>,
    ) -> Result<EventId, StructuralError> {
        self.add_event(
            ThreadId::INIT,
            Label::initialization(initial_values),
            Vec::new(),
        )
    }

    pub fn add_thread(&mut self) -> ThreadId {
        self.execution.add_thread()
    }

    pub fn add_event(
        &mut self,
        thread: ThreadId,
        label: Label,
        dependencies: Vec<EventId>,
    ) -> Result<EventId, StructuralError> {
        let id = match self.execution.add_event(thread, label, dependencies) {
            Ok(id) => id,
            Err(err) => {
                warn!("malformed event on {thread}: {err}");
                return Err(err);
            }
        };
        self.orders.on_event(&self.execution, id);
        for checker in &mut self.checkers {
            let found = checker.on_event(&self.execution, &mut self.orders, id);
            if self.inconsistency.is_none() {
                if let Some(inconsistency) = found {
                    debug!("{id} is inconsistent: {inconsistency}");
                    self.inconsistency = Some(inconsistency);
                }
            }
        }
        Ok(id)
    }

    /// The first inconsistency the incremental checks found.
    pub fn inconsistency(&self) -> Option<&Inconsistency> {
        self.inconsistency.as_ref()
    }

    /// Runs every checker over the whole execution.
    pub fn check_consistency(&mut self) -> Option<Inconsistency> {
        if let Some(inconsistency) = &self.inconsistency {
            return Some(inconsistency.clone());
        }
        for checker in &mut self.checkers {
            if let Some(inconsistency) = checker.check(&self.execution, &mut self.orders) {
                debug!("execution is inconsistent: {inconsistency}");
                self.inconsistency = Some(inconsistency.clone());
                return Some(inconsistency);
            }
        }
        None
    }

    pub fn current_execution(&self) -> &Execution {
        &self.execution
    }

    pub fn execution_order(&mut self) -> Result<&[EventId], Inconsistency> {
        self.orders.execution_order(&self.execution)
    }

    pub fn orders(&mut self) -> (&Execution, &mut DerivedOrders) {
        (&self.execution, &mut self.orders)
    }

    pub fn frontier(&self) -> ExecutionFrontier {
        self.execution.frontier()
    }

    /// Keeps the causal closure of `frontier`. Every derived order and checker is rebuilt
    /// before this returns, and an inconsistency among the kept events is reported again.
    pub fn reset(&mut self, frontier: &ExecutionFrontier) {
        self.execution.reset(frontier);
        self.settle();
    }

    /// Drops every event, including the initialization.
    pub fn clear(&mut self) {
        self.execution.clear();
        self.settle();
    }

    fn settle(&mut self) {
        self.orders.reset();
        self.inconsistency = None;
        for checker in &mut self.checkers {
            let found = checker.reset(&self.execution);
            if self.inconsistency.is_none() {
                if let Some(inconsistency) = found {
                    debug!("kept events are inconsistent: {inconsistency}");
                    self.inconsistency = Some(inconsistency);
                }
            }
        }
    }
}
