//! This library decides whether an [`Execution`] recorded by the
//! [Tangle](https://docs.rs/tangle_verifier/) model checker could have happened under a given
//! memory model.
//!
//! # Derived Orders
//!
//! [`DerivedOrders`] computes the relations memory models are phrased in (causality,
//! read-modify-write, writes-before, coherence, extended coherence, sequential consistency
//! and a total execution order) as a DAG of memoized computations. New events either update
//! a node incrementally or mark it dirty, and a dirty node is recomputed the next time it is
//! read.
//!
//! # Checkers
//!
//! A [`ConsistencyChecker`] reports an [`Inconsistency`] as a value. Checkers compose:
//! [`CheckedExecution`] runs [`AtomicityChecker`] and [`ReleaseAcquireChecker`] after every
//! event and [`SequentialConsistencyChecker`] on demand.
//!
//! # Additional Reading
//!
//! - ["Repairing Sequential Consistency in
//!   C/C++11"](https://plv.mpi-sws.org/scfix/paper.pdf) by Lahav et al.
//! - ["Model Checking for Weakly Consistent
//!   Libraries"](https://plv.mpi-sws.org/genmc/) by Kokologiannakis et al.

#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

mod atomicity;
mod checked_execution;
mod computable;
mod inconsistency;
mod orders;
mod relation;
mod release_acquire;
mod replay;
mod sequential_consistency;

pub use atomicity::AtomicityChecker;
pub use checked_execution::CheckedExecution;
pub use computable::{ComputationGraph, DependencyCycle, Invalidation, Strategy};
pub use inconsistency::{Inconsistency, RelationKind};
pub use orders::{AccessIndex, DerivedOrders, Order};
pub use relation::Relation;
pub use release_acquire::ReleaseAcquireChecker;
pub use sequential_consistency::SequentialConsistencyChecker;

use tangle_core::{EventId, Execution};

/// Checks an execution against one memory-model condition.
///
/// `on_event` runs after every appended event and should be cheap; `check` examines the
/// whole execution.
pub trait ConsistencyChecker {
    fn on_event(
        &mut self,
        _execution: &Execution,
        _orders: &mut DerivedOrders,
        _event: EventId,
    ) -> Option<Inconsistency> {
        None
    }

    fn check(&mut self, execution: &Execution, orders: &mut DerivedOrders)
        -> Option<Inconsistency>;

    /// Rebuilds any internal state after the execution was reset, returning the first
    /// inconsistency the kept events still show.
    fn reset(&mut self, _execution: &Execution) -> Option<Inconsistency> {
        None
    }
}
