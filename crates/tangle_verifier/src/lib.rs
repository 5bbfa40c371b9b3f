//! Tangle Verifier is a library for model checking [Tangle](https://docs.rs/tangle/) programs:
//! threads that share memory and monitors.
//!
//! # Example
//!
//! ```toml
//! [dependencies]
//! tangle = "0.1"
//!
//! [dev-dependencies]
//! tangle_verifier = "0.1"
//! ```
//!
//! ```rust
//! use tangle::*;
//!
//! // Increments a shared counter without holding the lock.
//! fn racy_increment(sdk: Sdk<'_>, counter: MemoryLocation) {
//!     let n = sdk.read_exclusive(counter).as_int().unwrap_or(0);
//!     sdk.write_exclusive(counter, n + 1);
//! }
//!
//! // Increments a shared counter while holding `lock`.
//! fn guarded_increment(sdk: Sdk<'_>, lock: ObjectId, counter: MemoryLocation) {
//!     sdk.synchronized(lock, || {
//!         let n = sdk.read(counter).as_int().unwrap_or(0);
//!         sdk.write(counter, n + 1);
//!     });
//! }
//!
//! // In the tests, the model checker searches for an interleaving that loses an update.
//! #[cfg(test)]
//! #[test]
//! # fn hack_so_next_fn_is_compiled_in_rustdoc() {}
//! fn lost_update() {
//!     use tangle_verifier::*;
//!     let mut verifier = Verifier::new(|cfg| {
//!         let counter = cfg.global(0);
//!         for _ in 0..2 {
//!             cfg.spawn(Fiber::new(move |sdk| racy_increment(sdk, counter)));
//!         }
//!     });
//!     let (inconsistency, _trace) = verifier.assert_inconsistent();
//!     println!("{inconsistency}");
//!
//!     let mut verifier = Verifier::new(|cfg| {
//!         let lock = cfg.object();
//!         let counter = cfg.global(0);
//!         let threads: Vec<_> = (0..2)
//!             .map(|_| cfg.spawn(Fiber::new(move |sdk| guarded_increment(sdk, lock, counter))))
//!             .collect();
//!         cfg.spawn(Fiber::new(move |sdk| {
//!             sdk.join(&threads);
//!             assert_eq!(sdk.read(counter), Value::Int(2));
//!         }));
//!     });
//!     // TIP: alternatively use verifier.assert_panic() if a thread is expected to panic.
//!     verifier.assert_no_panic();
//! }
//! # lost_update();
//! ```
//!
//! Set `TANGLE_DEBUG` to print the trace of every invocation, with the events behind a failure
//! highlighted. The library logs through [`tracing`](https://docs.rs/tracing/).

#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

mod event_structure;
mod interleaving_tree;
mod trace_record;
mod verifier;
mod visitor;

#[macro_export]
macro_rules! assert_trace {
    // Case 1: No expected records specified.
    [$records:expr $(,)?] => {
        if !$records.is_empty() {
            println!("Missing some records:");
            for r in $records.iter() {
                println!("\"{}\",", format!("{}", r).escape_debug().to_string());
            }
            panic!("^");
        }
    };
    // Case 2: Expected record(s) specified. Requires recursion.
    [$records:expr, $str:tt, $($rest:tt)*] => {
        $crate::assert_trace_![0 => $records, $str, $($rest)*];
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! assert_trace_ {
    // Base case: only one string to assert.
    ($i:expr => $records:expr, $str:tt $(,)?) => (
        assert_eq!($records[$i].to_string().as_str(), $str, "at [{}]", $i);
        if $i + 1 < $records.len() {
            println!("Missing some records:");
            for r in $records.iter().skip($i + 1) {
                println!("\"{}\",", format!("{}", r).escape_debug().to_string());
            }
            panic!("^");
        }
    );
    // Inductive case: assert and recurse.
    ($i:expr => $records:expr, $str:tt, $($rest:tt)*) => (
        assert_eq!($records[$i].to_string().as_str(), $str, "at [{}]", $i);
        $crate::assert_trace_!($i + 1 => $records, $($rest)*);
    );
}

pub use consistency_model::{Inconsistency, RelationKind};

pub use tangle_core::StructuralError;

pub use trace_record::TraceRecord;

pub use visitor::TraceRecordingVisitor;

pub use verifier::RunResult;

pub use verifier::Verifier;

pub use verifier::VerifierConfig;

pub use visitor::Visitor;
