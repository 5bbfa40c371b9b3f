use {
    std::collections::{BTreeMap, BTreeSet},
    tangle_core::EventId,
};

/// A binary relation over events, stored as sparse adjacency sets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Relation {
    successors: BTreeMap<EventId, BTreeSet<EventId>>,
}

impl Relation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, a: EventId, b: EventId) -> bool {
        self.successors.get(&a).map_or(false, |s| s.contains(&b))
    }

    /// Adds `(a, b)`. Returns whether the pair is new.
    pub fn insert(&mut self, a: EventId, b: EventId) -> bool {
        self.successors.entry(a).or_default().insert(b)
    }

    pub fn union_with(&mut self, other: &Relation) {
        for (a, b) in other.pairs() {
            self.insert(a, b);
        }
    }

    pub fn pairs(&self) -> impl Iterator<Item = (EventId, EventId)> + '_ {
        self.successors
            .iter()
            .flat_map(|(a, bs)| bs.iter().map(move |b| (*a, *b)))
    }

    pub fn successors(&self, a: EventId) -> impl Iterator<Item = EventId> + '_ {
        self.successors.get(&a).into_iter().flatten().copied()
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.successors.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.values().all(BTreeSet::is_empty)
    }

    /// Every event that appears in some pair.
    pub fn nodes(&self) -> BTreeSet<EventId> {
        self.pairs().flat_map(|(a, b)| [a, b]).collect()
    }

    /// A path from `from` to the first event of `targets` the search reaches, both ends
    /// included.
    pub fn path(&self, from: EventId, targets: &BTreeSet<EventId>) -> Option<Vec<EventId>> {
        let mut parents = BTreeMap::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            for next in self.successors(current) {
                if next == from || parents.contains_key(&next) {
                    continue;
                }
                parents.insert(next, current);
                if targets.contains(&next) {
                    let mut path = vec![next];
                    let mut at = next;
                    while let Some(parent) = parents.get(&at) {
                        path.push(*parent);
                        at = *parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                stack.push(next);
            }
        }
        None
    }

    /// Orders `nodes` so every pair of the relation restricted to them points forward.
    /// Ties go to the smaller event id, so the result is deterministic. Returns the events
    /// left on or behind cycles if there is no such order.
    pub fn topological_sort(
        &self,
        nodes: impl IntoIterator<Item = EventId>,
    ) -> Result<Vec<EventId>, Vec<EventId>> {
        let nodes: BTreeSet<EventId> = nodes.into_iter().collect();
        let mut in_degree: BTreeMap<EventId, usize> = nodes.iter().map(|e| (*e, 0)).collect();
        for a in &nodes {
            for b in self.successors(*a) {
                if let Some(degree) = in_degree.get_mut(&b) {
                    *degree += 1;
                }
            }
        }
        let mut ready: BTreeSet<EventId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(e, _)| *e)
            .collect();
        let mut sorted = Vec::with_capacity(nodes.len());
        while let Some(next) = ready.pop_first() {
            sorted.push(next);
            for b in self.successors(next) {
                if let Some(degree) = in_degree.get_mut(&b) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(b);
                    }
                }
            }
        }
        if sorted.len() == nodes.len() {
            Ok(sorted)
        } else {
            let sorted: BTreeSet<EventId> = sorted.into_iter().collect();
            Err(nodes.difference(&sorted).copied().collect())
        }
    }
}

impl FromIterator<(EventId, EventId)> for Relation {
    fn from_iter<I: IntoIterator<Item = (EventId, EventId)>>(iter: I) -> Self {
        let mut relation = Relation::default();
        for (a, b) in iter {
            relation.insert(a, b);
        }
        relation
    }
}
