use {
    crate::{
        replay::{replay_in_order, Progress, ReplayState},
        ConsistencyChecker, DerivedOrders, Inconsistency,
    },
    std::collections::HashSet,
    tangle_core::{Event, EventId, Execution},
    tracing::debug,
};

/// Decides whether an execution could have happened under sequential consistency by
/// replaying it against an abstract memory and monitor state.
///
/// The fast path replays the events in the order they were created, then the derived
/// execution order. If neither replays, a DFS explores every interleaving of the threads'
/// program orders that respects dependencies, deduplicating states by
/// `(progress, abstract state)`. The DFS is authoritative. Whichever order replays becomes the
/// execution order.
#[derive(Clone, Debug, Default)]
pub struct SequentialConsistencyChecker {
    searches: usize,
}

impl SequentialConsistencyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many checks needed the DFS.
    pub fn searches(&self) -> usize {
        self.searches
    }

    /// Finds a total order of all events that replays, or reports how far the longest
    /// replay got.
    pub fn serialize(&mut self, execution: &Execution) -> Result<Vec<EventId>, Inconsistency> {
        self.searches += 1;
        let witness: Vec<EventId> = execution.init_event().map(Event::id).into_iter().collect();
        let initial = (Progress::initial(execution), ReplayState::default());
        let mut visited = HashSet::new();
        visited.insert(initial.clone());
        let mut deepest = initial.0.clone();
        let mut stack = vec![(initial, witness)];

        while let Some(((progress, state), witness)) = stack.pop() {
            if progress.is_complete(execution) {
                return Ok(witness);
            }
            if progress.covered() > deepest.covered() {
                deepest = progress.clone();
            }
            for thread in progress.threads() {
                let Some(event) = progress.coverable(execution, thread) else {
                    continue;
                };
                let Some(next_state) = state.replay(execution, event) else {
                    continue;
                };
                let next = (progress.advance(thread), next_state);
                if visited.insert(next.clone()) {
                    let mut next_witness = witness.clone();
                    next_witness.push(event.id());
                    stack.push((next, next_witness));
                }
            }
        }
        let inconsistency = Inconsistency::SequentialConsistencyViolation {
            covered: deepest.covered(),
            pending: deepest.pending(execution),
        };
        debug!(states = visited.len(), "{inconsistency}");
        Err(inconsistency)
    }
}

impl ConsistencyChecker for SequentialConsistencyChecker {
    fn check(
        &mut self,
        execution: &Execution,
        orders: &mut DerivedOrders,
    ) -> Option<Inconsistency> {
        if replay_in_order(execution, execution.iter()).is_ok() {
            orders.force_execution_order(execution.iter().map(Event::id).collect());
            return None;
        }
        if let Ok(order) = orders.execution_order(execution) {
            if replay_in_order(execution, order.iter().map(|id| &execution[*id])).is_ok() {
                return None;
            }
        }
        match self.serialize(execution) {
            Ok(witness) => {
                orders.force_execution_order(witness);
                None
            }
            Err(inconsistency) => Some(inconsistency),
        }
    }
}
