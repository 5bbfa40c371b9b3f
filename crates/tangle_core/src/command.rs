use {
    crate::{MemoryLocation, ObjectId, ThreadId, Value},
    std::fmt::{self, Display, Formatter},
};

/// An operation a simulated thread asks the driver to perform. The driver answers with an
/// [`Outcome`] once it schedules the thread again.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Command {
    /// Answered with [`Outcome::Value`].
    Read {
        location: MemoryLocation,
        exclusive: bool,
    },
    /// An exclusive write must directly follow an exclusive read of the same location.
    Write {
        location: MemoryLocation,
        value: Value,
        exclusive: bool,
    },
    /// Atomic; answered with [`Outcome::Success`].
    CompareAndSet {
        location: MemoryLocation,
        expected: Value,
        new: Value,
    },
    /// Atomic; answered with the previous value.
    FetchAdd {
        location: MemoryLocation,
        delta: i64,
    },
    /// Answered with [`Outcome::Allocated`].
    Alloc,
    Lock(ObjectId),
    Unlock(ObjectId),
    Wait(ObjectId),
    Notify(ObjectId),
    NotifyAll(ObjectId),
    /// Starts threads that were spawned suspended.
    Fork(Vec<ThreadId>),
    /// Blocks until every listed thread exits.
    Join(Vec<ThreadId>),
    Exit,
}

impl Command {
    pub fn location(&self) -> Option<MemoryLocation> {
        match self {
            Command::Read { location, .. }
            | Command::Write { location, .. }
            | Command::CompareAndSet { location, .. }
            | Command::FetchAdd { location, .. } => Some(*location),
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Command::Read {
                location,
                exclusive,
            } => {
                let x = if *exclusive { "X" } else { "" };
                write!(f, "read{x}({location})")
            }
            Command::Write {
                location,
                value,
                exclusive,
            } => {
                let x = if *exclusive { "X" } else { "" };
                write!(f, "write{x}({location}, {value})")
            }
            Command::CompareAndSet {
                location,
                expected,
                new,
            } => write!(f, "cas({location}, {expected}, {new})"),
            Command::FetchAdd { location, delta } => write!(f, "fetch_add({location}, {delta})"),
            Command::Alloc => f.write_str("alloc"),
            Command::Lock(m) => write!(f, "lock({m})"),
            Command::Unlock(m) => write!(f, "unlock({m})"),
            Command::Wait(m) => write!(f, "wait({m})"),
            Command::Notify(m) => write!(f, "notify({m})"),
            Command::NotifyAll(m) => write!(f, "notify_all({m})"),
            Command::Fork(threads) => write!(f, "fork({threads:?})"),
            Command::Join(threads) => write!(f, "join({threads:?})"),
            Command::Exit => f.write_str("exit"),
        }
    }
}

/// The driver's answer to a [`Command`].
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[non_exhaustive]
pub enum Outcome {
    /// The first outcome every thread receives.
    Started(ThreadId),
    Done,
    Value(Value),
    Success(bool),
    Allocated(ObjectId),
}

/// A sequential behavior driven one [`Command`] at a time.
pub trait Step {
    fn step(&mut self, outcome: Outcome) -> Command;
}

impl<F> Step for F
where
    F: FnMut(Outcome) -> Command,
{
    fn step(&mut self, outcome: Outcome) -> Command {
        self(outcome)
    }
}
