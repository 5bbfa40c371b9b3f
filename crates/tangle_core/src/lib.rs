//! Core types for the [Tangle](https://docs.rs/tangle_verifier/) model checker: events, the
//! labels describing them, and the [`Execution`] that records one run of a program as a
//! partial order of events.
//!
//! # Usage
//!
//! Please see [the `tangle_verifier` docs](https://docs.rs/tangle_verifier/).
//!
//! # Features
//!
//! - `serde`: Implement `Serialize` and `Deserialize` where applicable.

#![cfg_attr(all(doc, CHANNEL_NIGHTLY), feature(doc_auto_cfg))]
#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

mod command;
mod error;
mod event;
mod execution;
mod id;
mod label;
mod registry;
mod value;

pub use command::{Command, Outcome, Step};
pub use error::StructuralError;
pub use event::Event;
pub use execution::{Execution, ExecutionFrontier};
pub use id::{EventId, EventIdGenerator, ObjectId, ThreadId};
pub use label::{Label, LabelKind, ThreadSet};
pub use registry::{ObjectRegistry, RegistryEntry};
pub use value::{MemoryLocation, Value};
pub use vector_clock::VectorClock;
