use {
    std::{collections::BTreeMap, fmt::Debug},
    thiserror::Error,
};

/// How a node keeps its value current as events are added.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// The owner folds every new event into the value directly.
    Incremental,
    /// Every new event marks the value dirty; the next read recomputes it from scratch.
    Resetting,
}

/// What a dependency edge implies when the upstream node changes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Invalidation {
    /// The dependent is marked dirty.
    #[default]
    Hard,
    /// The dependent only needs the upstream value to be current when it is computed.
    Soft,
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{dependent} cannot depend on {dependency}: the graph would have a cycle")]
pub struct DependencyCycle {
    pub dependent: String,
    pub dependency: String,
}

#[derive(Clone, Debug)]
struct Node<K> {
    strategy: Strategy,
    dirty: bool,
    dependencies: Vec<(K, Invalidation)>,
}

/// Bookkeeping for a DAG of memoized computations keyed by `K`.
///
/// The graph tracks dirty bits and evaluation order; the values themselves live with the
/// owner, which asks [`ComputationGraph::evaluation_order`] what to recompute before reading
/// a node. Dependency cycles are rejected when the edge is registered.
#[derive(Clone, Debug)]
pub struct ComputationGraph<K> {
    nodes: BTreeMap<K, Node<K>>,
}

impl<K> Default for ComputationGraph<K> {
    fn default() -> Self {
        ComputationGraph {
            nodes: BTreeMap::new(),
        }
    }
}

impl<K: Copy + Debug + Ord> ComputationGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node. New nodes start dirty.
    pub fn add_node(&mut self, key: K, strategy: Strategy) {
        self.nodes.insert(
            key,
            Node {
                strategy,
                dirty: true,
                dependencies: Vec::new(),
            },
        );
    }

    pub fn depends_on(
        &mut self,
        dependent: K,
        dependency: K,
        invalidation: Invalidation,
    ) -> Result<(), DependencyCycle> {
        if dependent == dependency || self.reaches(dependency, dependent) {
            return Err(DependencyCycle {
                dependent: format!("{dependent:?}"),
                dependency: format!("{dependency:?}"),
            });
        }
        if let Some(node) = self.nodes.get_mut(&dependent) {
            node.dependencies.push((dependency, invalidation));
        }
        Ok(())
    }

    /// Whether `to` is a (transitive) dependency of `from`.
    fn reaches(&self, from: K, to: K) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();
        while let Some(key) = stack.pop() {
            if key == to {
                return true;
            }
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            if let Some(node) = self.nodes.get(&key) {
                stack.extend(node.dependencies.iter().map(|(k, _)| *k));
            }
        }
        false
    }

    pub fn is_dirty(&self, key: K) -> bool {
        self.nodes.get(&key).map_or(true, |node| node.dirty)
    }

    /// Called when a new event is added. Marks every resetting node dirty and returns the
    /// incremental nodes, in evaluation order, for the owner to update. Their hard dependents
    /// are invalidated too.
    pub fn on_event(&mut self) -> Vec<K> {
        let mut incremental = Vec::new();
        for (key, node) in self.nodes.iter_mut() {
            match node.strategy {
                Strategy::Resetting => node.dirty = true,
                Strategy::Incremental => incremental.push(*key),
            }
        }
        for key in &incremental {
            self.invalidate_dependents(*key);
        }
        let order = self.topological_order();
        order
            .into_iter()
            .filter(|key| incremental.contains(key))
            .collect()
    }

    /// Marks `key` and everything that hard-depends on it dirty.
    pub fn invalidate(&mut self, key: K) {
        if let Some(node) = self.nodes.get_mut(&key) {
            node.dirty = true;
        }
        self.invalidate_dependents(key);
    }

    fn invalidate_dependents(&mut self, key: K) {
        let mut stack = vec![key];
        while let Some(changed) = stack.pop() {
            for (dependent, node) in self.nodes.iter_mut() {
                let hard = node
                    .dependencies
                    .iter()
                    .any(|(k, inv)| *k == changed && *inv == Invalidation::Hard);
                if hard && !node.dirty {
                    node.dirty = true;
                    stack.push(*dependent);
                }
            }
        }
    }

    /// Records that `key` was recomputed: it is clean and its hard dependents are stale.
    pub fn recomputed(&mut self, key: K) {
        self.invalidate_dependents(key);
        if let Some(node) = self.nodes.get_mut(&key) {
            node.dirty = false;
        }
    }

    /// Overrides a node's value from outside its own computation.
    pub fn force(&mut self, key: K) {
        self.recomputed(key);
    }

    /// Marks every node dirty, e.g. after the execution was reset.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            node.dirty = true;
        }
    }

    /// `key` and its transitive dependencies, dependencies first.
    pub fn evaluation_order(&self, key: K) -> Vec<K> {
        let mut order = Vec::new();
        self.visit(key, &mut order);
        order
    }

    fn visit(&self, key: K, order: &mut Vec<K>) {
        if order.contains(&key) {
            return;
        }
        if let Some(node) = self.nodes.get(&key) {
            for (dependency, _) in &node.dependencies {
                self.visit(*dependency, order);
            }
        }
        order.push(key);
    }

    fn topological_order(&self) -> Vec<K> {
        let mut order = Vec::new();
        for key in self.nodes.keys() {
            self.visit(*key, &mut order);
        }
        order
    }
}
