use {
    crate::{
        computable::{ComputationGraph, Invalidation, Strategy},
        Inconsistency, Relation, RelationKind,
    },
    std::collections::BTreeMap,
    tangle_core::{Event, EventId, Execution, Label, LabelKind, MemoryLocation},
    tracing::trace,
};

/// Nodes of the derived-order dependency graph.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Order {
    AccessIndex,
    Causality,
    ReadModifyWrite,
    WritesBefore,
    Coherence,
    ExtendedCoherence,
    SequentialConsistency,
    ExecutionOrder,
}

/// Memory accesses grouped by location. The initialization counts as the first write of
/// every location.
#[derive(Clone, Debug, Default)]
pub struct AccessIndex {
    init: Option<EventId>,
    writes: BTreeMap<MemoryLocation, Vec<EventId>>,
    reads: BTreeMap<MemoryLocation, Vec<EventId>>,
}

impl AccessIndex {
    fn add(&mut self, event: &Event) {
        match event.label() {
            Label::Initialization { .. } => self.init = Some(event.id()),
            Label::WriteAccess { location, .. } => {
                self.writes.entry(*location).or_default().push(event.id())
            }
            Label::ReadAccess {
                kind: LabelKind::Response,
                location,
                ..
            } => {
                self.reads.entry(*location).or_default().push(event.id())
            }
            _ => {}
        }
    }

    fn rebuild(&mut self, execution: &Execution) {
        *self = AccessIndex::default();
        for event in execution.iter() {
            self.add(event);
        }
    }

    pub fn locations(&self) -> impl Iterator<Item = MemoryLocation> + '_ {
        let mut locations: Vec<_> = self.writes.keys().chain(self.reads.keys()).copied().collect();
        locations.sort();
        locations.dedup();
        locations.into_iter()
    }

    /// Writes of `location`, starting with the initialization.
    pub fn writes(&self, location: &MemoryLocation) -> Vec<EventId> {
        self.init
            .into_iter()
            .chain(self.writes.get(location).into_iter().flatten().copied())
            .collect()
    }

    /// Read responses of `location`.
    pub fn reads(&self, location: &MemoryLocation) -> &[EventId] {
        self.reads.get(location).map_or(&[], Vec::as_slice)
    }
}

/// The memoized derived orders of one execution.
///
/// Relations are stored by their generating pairs; each order is the transitive closure of
/// what is stored.
///
/// | order                  | generated by                                 | strategy    |
/// |------------------------|----------------------------------------------|-------------|
/// | causality (`hb`)       | program order and dependency edges           | resetting   |
/// | read-modify-write      | `rf(r) -> w` for each exclusive pair `r; w`  | resetting   |
/// | writes-before (`wb`)   | same-location writes forced apart by `hb`, rmw and reads | resetting |
/// | coherence (`co`)       | per-location chain of a topological sort of `wb` | resetting |
/// | extended coherence     | `co ∪ wb ∪ rf ∪ fr`                          | resetting   |
/// | sequential consistency | `hb ∪ eco`                                   | resetting   |
/// | execution order        | topological sort of `sc`, or a forced order  | resetting   |
///
/// Each order is recomputed on first access after it is invalidated. Acyclicity is checked
/// by sorting, so no order is ever closed explicitly.
#[derive(Clone, Debug)]
pub struct DerivedOrders {
    graph: ComputationGraph<Order>,
    index: AccessIndex,
    causality: Relation,
    read_modify_write: Relation,
    writes_before: Relation,
    coherence: Result<Relation, Inconsistency>,
    /// Per-location coherence order, initialization first.
    coherence_chains: BTreeMap<MemoryLocation, Vec<EventId>>,
    extended_coherence: Result<Relation, Inconsistency>,
    sequential_consistency: Result<Relation, Inconsistency>,
    execution_order: Result<Vec<EventId>, Inconsistency>,
}

const WIRING: [(Order, Order); 12] = [
    (Order::ReadModifyWrite, Order::AccessIndex),
    (Order::WritesBefore, Order::AccessIndex),
    (Order::WritesBefore, Order::Causality),
    (Order::WritesBefore, Order::ReadModifyWrite),
    (Order::Coherence, Order::WritesBefore),
    (Order::Coherence, Order::ReadModifyWrite),
    (Order::ExtendedCoherence, Order::WritesBefore),
    (Order::ExtendedCoherence, Order::Coherence),
    (Order::SequentialConsistency, Order::Causality),
    (Order::SequentialConsistency, Order::ExtendedCoherence),
    (Order::ExecutionOrder, Order::ExtendedCoherence),
    (Order::ExecutionOrder, Order::SequentialConsistency),
];

impl Default for DerivedOrders {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivedOrders {
    /// # Panics
    ///
    /// If the static wiring between orders has a cycle.
    pub fn new() -> Self {
        let mut graph = ComputationGraph::new();
        graph.add_node(Order::AccessIndex, Strategy::Incremental);
        for order in [
            Order::Causality,
            Order::ReadModifyWrite,
            Order::WritesBefore,
            Order::Coherence,
            Order::ExtendedCoherence,
            Order::SequentialConsistency,
            Order::ExecutionOrder,
        ] {
            graph.add_node(order, Strategy::Resetting);
        }
        for (dependent, dependency) in WIRING {
            if let Err(cycle) = graph.depends_on(dependent, dependency, Invalidation::Hard) {
                panic!("derived orders are miswired: {cycle}");
            }
        }

        DerivedOrders {
            graph,
            index: AccessIndex::default(),
            causality: Relation::default(),
            read_modify_write: Relation::default(),
            writes_before: Relation::default(),
            coherence: Ok(Relation::default()),
            coherence_chains: BTreeMap::new(),
            extended_coherence: Ok(Relation::default()),
            sequential_consistency: Ok(Relation::default()),
            execution_order: Ok(Vec::new()),
        }
    }

    /// Folds a newly appended event into the incremental nodes and invalidates the rest.
    pub fn on_event(&mut self, execution: &Execution, event: EventId) {
        for order in self.graph.on_event() {
            if order == Order::AccessIndex && !self.graph.is_dirty(order) {
                if let Some(event) = execution.get(event) {
                    self.index.add(event);
                }
            }
        }
    }

    /// Forgets every cached value, e.g. after the execution was reset.
    pub fn reset(&mut self) {
        self.graph.reset();
    }

    pub fn is_dirty(&self, order: Order) -> bool {
        self.graph.is_dirty(order)
    }

    fn ensure(&mut self, execution: &Execution, target: Order) {
        for order in self.graph.evaluation_order(target) {
            if self.graph.is_dirty(order) {
                trace!("recomputing {order:?}");
                self.compute(execution, order);
                self.graph.recomputed(order);
            }
        }
    }

    pub fn access_index(&mut self, execution: &Execution) -> &AccessIndex {
        self.ensure(execution, Order::AccessIndex);
        &self.index
    }

    pub fn causality(&mut self, execution: &Execution) -> &Relation {
        self.ensure(execution, Order::Causality);
        &self.causality
    }

    pub fn read_modify_write(&mut self, execution: &Execution) -> &Relation {
        self.ensure(execution, Order::ReadModifyWrite);
        &self.read_modify_write
    }

    pub fn writes_before(&mut self, execution: &Execution) -> &Relation {
        self.ensure(execution, Order::WritesBefore);
        &self.writes_before
    }

    pub fn coherence(&mut self, execution: &Execution) -> Result<&Relation, Inconsistency> {
        self.ensure(execution, Order::Coherence);
        self.coherence.as_ref().map_err(Clone::clone)
    }

    pub fn extended_coherence(
        &mut self,
        execution: &Execution,
    ) -> Result<&Relation, Inconsistency> {
        self.ensure(execution, Order::ExtendedCoherence);
        self.extended_coherence.as_ref().map_err(Clone::clone)
    }

    pub fn sequential_consistency(
        &mut self,
        execution: &Execution,
    ) -> Result<&Relation, Inconsistency> {
        self.ensure(execution, Order::SequentialConsistency);
        self.sequential_consistency.as_ref().map_err(Clone::clone)
    }

    pub fn execution_order(&mut self, execution: &Execution) -> Result<&[EventId], Inconsistency> {
        self.ensure(execution, Order::ExecutionOrder);
        match &self.execution_order {
            Ok(order) => Ok(order),
            Err(e) => Err(e.clone()),
        }
    }

    /// Replaces the execution order with a witness found elsewhere (e.g. by replay).
    pub fn force_execution_order(&mut self, order: Vec<EventId>) {
        self.execution_order = Ok(order);
        self.graph.force(Order::ExecutionOrder);
    }

    fn compute(&mut self, execution: &Execution, order: Order) {
        match order {
            Order::AccessIndex => self.index.rebuild(execution),
            Order::Causality => {
                let init = execution.init_event().map(Event::id);
                let mut hb = Relation::new();
                for event in execution.iter() {
                    let parent = event.parent().or(init.filter(|i| *i != event.id()));
                    for a in parent.into_iter().chain(event.dependencies().iter().copied()) {
                        hb.insert(a, event.id());
                    }
                }
                self.causality = hb;
            }
            Order::ReadModifyWrite => {
                let mut rmw = Relation::new();
                for write in execution.iter().filter(|e| e.label().is_exclusive_write()) {
                    let read = write.parent().and_then(|p| execution.reads_from(p));
                    if let Some(source) = read {
                        rmw.insert(source, write.id());
                    }
                }
                self.read_modify_write = rmw;
            }
            Order::WritesBefore => {
                let mut wb = Relation::new();
                for location in self.index.locations() {
                    let writes = self.index.writes(&location);
                    for w1 in &writes {
                        for w2 in &writes {
                            if execution.happens_before(*w1, *w2)
                                || self.read_modify_write.contains(*w1, *w2)
                            {
                                wb.insert(*w1, *w2);
                            }
                        }
                    }
                    for read in self.index.reads(&location) {
                        let Some(source) = execution.reads_from(*read) else {
                            continue;
                        };
                        for other in writes.iter().filter(|w| **w != source) {
                            if execution.happens_before(*other, *read) {
                                wb.insert(*other, source);
                            }
                            if execution.happens_before(*read, *other) {
                                wb.insert(source, *other);
                            }
                        }
                    }
                }
                self.writes_before = wb;
            }
            Order::Coherence => {
                let mut co = Relation::new();
                let mut chains = BTreeMap::new();
                let mut result = Ok(());
                for location in self.index.locations() {
                    match self
                        .writes_before
                        .topological_sort(self.index.writes(&location))
                    {
                        Ok(sorted) => {
                            for pair in sorted.windows(2) {
                                co.insert(pair[0], pair[1]);
                            }
                            chains.insert(location, sorted);
                        }
                        Err(events) => {
                            result = Err(Inconsistency::RelationCycle {
                                relation: RelationKind::WritesBefore,
                                events,
                            });
                            break;
                        }
                    }
                }
                self.coherence_chains = chains;
                self.coherence = result.map(|()| co);
            }
            Order::ExtendedCoherence => {
                self.extended_coherence = match &self.coherence {
                    Err(e) => Err(e.clone()),
                    Ok(co) => {
                        let mut eco = co.clone();
                        eco.union_with(&self.writes_before);
                        for (location, chain) in &self.coherence_chains {
                            for read in self.index.reads(location) {
                                let Some(source) = execution.reads_from(*read) else {
                                    continue;
                                };
                                eco.insert(source, *read);
                                // From-read: the read precedes the write overwriting its source.
                                let next = chain
                                    .iter()
                                    .position(|w| *w == source)
                                    .and_then(|i| chain.get(i + 1));
                                if let Some(next) = next {
                                    eco.insert(*read, *next);
                                }
                            }
                        }
                        let nodes = eco.nodes();
                        acyclic(eco, nodes, RelationKind::ExtendedCoherence)
                    }
                };
            }
            Order::SequentialConsistency => {
                self.sequential_consistency = match &self.extended_coherence {
                    Err(e) => Err(e.clone()),
                    Ok(eco) => {
                        let mut sc = self.causality.clone();
                        sc.union_with(eco);
                        acyclic(
                            sc,
                            execution.iter().map(Event::id),
                            RelationKind::SequentialConsistency,
                        )
                    }
                };
            }
            Order::ExecutionOrder => {
                self.execution_order = match &self.sequential_consistency {
                    Err(e) => Err(e.clone()),
                    Ok(sc) => sc
                        .topological_sort(execution.iter().map(Event::id))
                        .map_err(|events| Inconsistency::RelationCycle {
                            relation: RelationKind::ExecutionOrder,
                            events,
                        }),
                };
            }
        }
    }
}

fn acyclic(
    relation: Relation,
    nodes: impl IntoIterator<Item = EventId>,
    kind: RelationKind,
) -> Result<Relation, Inconsistency> {
    match relation.topological_sort(nodes) {
        Ok(_) => Ok(relation),
        Err(events) => Err(Inconsistency::RelationCycle {
            relation: kind,
            events,
        }),
    }
}
