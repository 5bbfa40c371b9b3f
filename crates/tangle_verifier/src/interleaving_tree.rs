use {
    rand::{rngs::StdRng, Rng, SeedableRng},
    std::fmt::{self, Display, Formatter},
    tangle_core::ThreadId,
    tracing::debug,
};

/// The scheduling decisions of one invocation.
///
/// Positions count switch points since the previous switch (or since the start). The first
/// command a thread runs after being switched to is not a switch point.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Interleaving {
    switches: Vec<(usize, ThreadId)>,
    /// Child indices taken at each (switch node, thread node) pair, for [`InterleavingTree::commit`].
    path: Vec<(usize, usize)>,
}

impl Interleaving {
    /// The switch planned after `position` switch points of segment `segment`, if any.
    pub(crate) fn switch_at(&self, segment: usize, position: usize) -> Option<ThreadId> {
        self.switches
            .get(segment)
            .filter(|(at, _)| *at == position)
            .map(|(_, thread)| *thread)
    }

    pub(crate) fn switch_count(&self) -> usize {
        self.switches.len()
    }
}

impl Display for Interleaving {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (position, thread)) in self.switches.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{position}→{thread}")?;
        }
        write!(f, "]")
    }
}

/// Switch points seen in the last segment of an invocation: for each position, the other
/// threads that could have run there.
pub(crate) type SwitchPoints = Vec<Vec<ThreadId>>;

/// Search tree over (switch position, thread) decisions.
///
/// Each invocation walks from the root, picking a weighted random child at every node,
/// until it reaches a node no invocation has passed yet or the switch budget. The budget
/// starts at one switch and grows once every interleaving within it was explored.
pub(crate) struct InterleavingTree {
    root: SwitchChoosingNode,
    max_switches: usize,
    rng: StdRng,
}

impl InterleavingTree {
    pub(crate) fn new(seed: u64) -> Self {
        InterleavingTree {
            root: SwitchChoosingNode::new(),
            max_switches: 1,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub(crate) fn max_switches(&self) -> usize {
        self.max_switches
    }

    /// Picks the next interleaving to run, deepening the switch budget if the current one is
    /// exhausted. Returns `None` once no interleaving is left at any depth.
    pub(crate) fn next(&mut self) -> Option<Interleaving> {
        if self.root.fully_explored {
            if !self.root.expandable(self.max_switches) {
                return None;
            }
            self.max_switches += 1;
            self.root.reset_exploration();
            debug!("deepening to {} switches", self.max_switches);
        }
        let mut interleaving = Interleaving::default();
        let mut node = &self.root;
        while interleaving.switch_count() < self.max_switches {
            let choices = match &node.choices {
                None => break,
                Some(choices) => choices,
            };
            let i = choose(&mut self.rng, choices, |(_, c)| c.fraction_unexplored)?;
            let (position, thread_node) = &choices[i];
            let j = choose(&mut self.rng, &thread_node.choices, |(_, c)| {
                c.fraction_unexplored
            })?;
            let (thread, next) = &thread_node.choices[j];
            interleaving.switches.push((*position, *thread));
            interleaving.path.push((i, j));
            node = next;
        }
        Some(interleaving)
    }

    /// Records a finished or abandoned invocation: the node it ended at learns the switch
    /// points the invocation reached and, at the depth limit, is marked explored. Until an
    /// invocation is committed its branch stays unexplored.
    pub(crate) fn commit(&mut self, interleaving: &Interleaving, discovered: SwitchPoints) {
        let max_switches = self.max_switches;
        self.root.commit(&interleaving.path, discovered, max_switches);
    }

    pub(crate) fn is_fully_explored(&self) -> bool {
        self.root.fully_explored && !self.root.expandable(self.max_switches)
    }
}

fn choose<T>(rng: &mut StdRng, choices: &[T], weight: impl Fn(&T) -> f64) -> Option<usize> {
    let unexplored = |c: &T| weight(c) > 0.0;
    match choices.len() {
        0 => return None,
        1 => return Some(0),
        _ => {}
    }
    let total: f64 = choices.iter().map(&weight).sum();
    let target = rng.gen::<f64>() * total;
    let mut sum = 0.0;
    for (i, choice) in choices.iter().enumerate() {
        sum += weight(choice);
        if unexplored(choice) && sum >= target {
            return Some(i);
        }
    }
    // Rounding can leave `sum` short of `target`.
    choices.iter().rposition(unexplored)
}

#[derive(Debug)]
struct SwitchChoosingNode {
    /// One child per position where another thread could run. `None` until an invocation
    /// ends at this node.
    choices: Option<Vec<(usize, ThreadChoosingNode)>>,
    fully_explored: bool,
    fraction_unexplored: f64,
}

#[derive(Debug)]
struct ThreadChoosingNode {
    choices: Vec<(ThreadId, SwitchChoosingNode)>,
    fully_explored: bool,
    fraction_unexplored: f64,
}

impl SwitchChoosingNode {
    fn new() -> Self {
        SwitchChoosingNode {
            choices: None,
            fully_explored: false,
            fraction_unexplored: 1.0,
        }
    }

    fn commit(&mut self, path: &[(usize, usize)], discovered: SwitchPoints, remaining: usize) {
        let Some(((i, j), rest)) = path.split_first() else {
            if self.choices.is_none() {
                self.initialize(discovered);
            }
            if remaining == 0 {
                self.finish();
            }
            return;
        };
        if let Some(choices) = &mut self.choices {
            let thread_node = &mut choices[*i].1;
            thread_node.choices[*j]
                .1
                .commit(rest, discovered, remaining.saturating_sub(1));
            thread_node.update_statistics();
        }
        self.update_statistics();
    }

    fn initialize(&mut self, discovered: SwitchPoints) {
        let choices = discovered
            .into_iter()
            .enumerate()
            .filter(|(_, threads)| !threads.is_empty())
            .map(|(position, threads)| (position, ThreadChoosingNode::new(threads)))
            .collect();
        self.choices = Some(choices);
        self.update_statistics();
    }

    fn finish(&mut self) {
        self.fully_explored = true;
        self.fraction_unexplored = 0.0;
    }

    fn update_statistics(&mut self) {
        let Some(choices) = &self.choices else {
            return;
        };
        if choices.is_empty() {
            return self.finish();
        }
        let total: f64 = choices.iter().map(|(_, c)| c.fraction_unexplored).sum();
        self.fraction_unexplored = total / choices.len() as f64;
        self.fully_explored = choices.iter().all(|(_, c)| c.fully_explored);
    }

    fn reset_exploration(&mut self) {
        match &mut self.choices {
            None => {
                self.fully_explored = false;
                self.fraction_unexplored = 1.0;
            }
            Some(choices) => {
                for (_, thread_node) in choices.iter_mut() {
                    for (_, next) in &mut thread_node.choices {
                        next.reset_exploration();
                    }
                    thread_node.update_statistics();
                }
                self.update_statistics();
            }
        }
    }

    /// Whether a node `depth` levels down could still switch.
    fn expandable(&self, depth: usize) -> bool {
        match &self.choices {
            None => depth > 0,
            Some(choices) if depth == 0 => !choices.is_empty(),
            Some(choices) => choices.iter().any(|(_, thread_node)| {
                thread_node
                    .choices
                    .iter()
                    .any(|(_, next)| next.expandable(depth - 1))
            }),
        }
    }
}

impl ThreadChoosingNode {
    fn new(threads: Vec<ThreadId>) -> Self {
        ThreadChoosingNode {
            choices: threads
                .into_iter()
                .map(|t| (t, SwitchChoosingNode::new()))
                .collect(),
            fully_explored: false,
            fraction_unexplored: 1.0,
        }
    }

    fn update_statistics(&mut self) {
        if self.choices.is_empty() {
            self.fully_explored = true;
            self.fraction_unexplored = 0.0;
            return;
        }
        let total: f64 = self.choices.iter().map(|(_, c)| c.fraction_unexplored).sum();
        self.fraction_unexplored = total / self.choices.len() as f64;
        self.fully_explored = self.choices.iter().all(|(_, c)| c.fully_explored);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn t(n: usize) -> ThreadId {
        ThreadId::from(n)
    }

    #[test]
    fn no_switch_points_is_explored_after_one_invocation() {
        let mut tree = InterleavingTree::new(0);
        let first = tree.next().unwrap();
        assert_eq!(first.switch_count(), 0);
        tree.commit(&first, Vec::new());
        assert!(tree.is_fully_explored());
        assert_eq!(tree.next(), None);
    }

    #[test]
    fn every_single_switch_is_tried_before_deepening() {
        let mut tree = InterleavingTree::new(7);
        let first = tree.next().unwrap();
        // Two positions at which thread 2 could take over.
        tree.commit(&first, vec![vec![t(2)], vec![t(2)]]);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let interleaving = tree.next().unwrap();
            assert_eq!(interleaving.switch_count(), 1);
            assert_eq!(tree.max_switches(), 1);
            seen.push(interleaving.switches[0]);
            // After the switch, thread 1 could take over once more.
            tree.commit(&interleaving, vec![vec![t(1)]]);
        }
        seen.sort();
        assert_eq!(seen, vec![(0, t(2)), (1, t(2))]);

        let deeper = tree.next().unwrap();
        assert_eq!(tree.max_switches(), 2);
        assert_eq!(deeper.switch_count(), 2);
    }

    #[test]
    fn uncommitted_invocations_stay_unexplored() {
        let mut tree = InterleavingTree::new(1);
        let first = tree.next().unwrap();
        tree.commit(&first, vec![vec![t(2)]]);
        let aborted = tree.next().unwrap();
        assert!(!tree.is_fully_explored());
        assert_eq!(tree.next(), Some(aborted.clone()));
        tree.commit(&aborted, Vec::new());
        assert!(tree.is_fully_explored());
    }

    #[test]
    fn positions_without_alternatives_are_skipped() {
        let mut tree = InterleavingTree::new(3);
        let first = tree.next().unwrap();
        tree.commit(&first, vec![vec![], vec![t(3)], vec![]]);
        let second = tree.next().unwrap();
        assert_eq!(second.switch_at(0, 1), Some(t(3)));
        assert_eq!(second.switch_at(0, 0), None);
    }
}
