//! Tangle is a library for writing concurrent programs as cooperative threads over simulated
//! shared memory and monitors, so that a model checker can drive every interleaving.
//!
//! Each thread is a [`Fiber`]. The [`Sdk`] handed to its body turns every shared-memory or
//! monitor operation into a [`Command`] and suspends until the driver answers with an
//! [`Outcome`].
//!
//! # Usage
//!
//! Please see [the `tangle_verifier` docs](https://docs.rs/tangle_verifier/).
//!
//! # Features
//!
//! - `fibers` (default): Include [`Fiber`] and [`Sdk`].

#![cfg_attr(all(doc, CHANNEL_NIGHTLY), feature(doc_auto_cfg))]
#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

#[cfg(feature = "fibers")]
mod fiber;
#[cfg(feature = "fibers")]
mod sdk;

#[cfg(feature = "fibers")]
pub use fiber::Fiber;

pub use tangle_core::{Command, MemoryLocation, ObjectId, Outcome, Step, ThreadId, Value};

#[cfg(feature = "fibers")]
pub use sdk::Sdk;
