//! Event labels and the synchronization algebra that combines them.
//!
//! Operations that may block are split into a request and a response. A request
//! synchronizes with a compatible "send" label recorded elsewhere in the execution (a write,
//! an unlock, a notify, a fork, a finish or the initialization) and the result is the
//! response label, e.g. `Write(x, 1) ⊕ Read^req(x) = Read^rsp(x, 1)`.

use {
    crate::{MemoryLocation, ObjectId, ThreadId},
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt::{self, Display, Formatter},
        sync::Arc,
    },
};

pub type ThreadSet = BTreeSet<ThreadId>;

/// The phase of an operation.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LabelKind {
    /// A complete, non-blocking action that other events may synchronize with.
    Send,
    /// The first half of a blocking action, waiting for a send to synchronize with.
    Request,
    /// The completed blocking action.
    Response,
}

/// What an event does.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Label {
    /// The root of every execution. Provides the initial value of every location; locations
    /// without an entry start as `null`.
    Initialization {
        initial_values: Arc<BTreeMap<MemoryLocation, ObjectId>>,
    },
    ObjectAllocation {
        object: ObjectId,
    },
    ReadAccess {
        kind: LabelKind,
        location: MemoryLocation,
        /// `None` for requests.
        value: Option<ObjectId>,
        exclusive: bool,
    },
    WriteAccess {
        location: MemoryLocation,
        value: ObjectId,
        exclusive: bool,
    },
    /// `depth` is the hold count after the acquire. Only the outermost acquire (`depth == 1`)
    /// blocks; a synthetic lock re-acquires a monitor after `wait` and restores `depth`.
    Lock {
        kind: LabelKind,
        mutex: ObjectId,
        depth: u32,
        synthetic: bool,
    },
    /// `depth` is the hold count before the release. A synthetic unlock (issued by `wait`)
    /// releases every hold at once.
    Unlock {
        mutex: ObjectId,
        depth: u32,
        synthetic: bool,
    },
    Wait {
        kind: LabelKind,
        mutex: ObjectId,
    },
    Notify {
        mutex: ObjectId,
        broadcast: bool,
    },
    ThreadFork {
        forked: ThreadSet,
    },
    ThreadStart {
        kind: LabelKind,
        thread: ThreadId,
    },
    ThreadFinish {
        finished: ThreadSet,
    },
    /// `joined` holds the threads still awaited, so a response always has an empty set.
    ThreadJoin {
        kind: LabelKind,
        joined: ThreadSet,
    },
}

impl Label {
    pub fn initialization(initial_values: BTreeMap<MemoryLocation, ObjectId>) -> Self {
        Label::Initialization {
            initial_values: Arc::new(initial_values),
        }
    }

    pub fn read_request(location: MemoryLocation, exclusive: bool) -> Self {
        Label::ReadAccess {
            kind: LabelKind::Request,
            location,
            value: None,
            exclusive,
        }
    }

    pub fn write(location: MemoryLocation, value: ObjectId, exclusive: bool) -> Self {
        Label::WriteAccess {
            location,
            value,
            exclusive,
        }
    }

    pub fn lock_request(mutex: ObjectId, depth: u32, synthetic: bool) -> Self {
        Label::Lock {
            kind: LabelKind::Request,
            mutex,
            depth,
            synthetic,
        }
    }

    pub fn kind(&self) -> LabelKind {
        match self {
            Label::ReadAccess { kind, .. }
            | Label::Wait { kind, .. }
            | Label::ThreadStart { kind, .. }
            | Label::ThreadJoin { kind, .. }
            | Label::Lock { kind, .. } => *kind,
            Label::Initialization { .. }
            | Label::ObjectAllocation { .. }
            | Label::WriteAccess { .. }
            | Label::Unlock { .. }
            | Label::Notify { .. }
            | Label::ThreadFork { .. }
            | Label::ThreadFinish { .. } => LabelKind::Send,
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind() == LabelKind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind() == LabelKind::Response
    }

    pub fn is_initialization(&self) -> bool {
        matches!(self, Label::Initialization { .. })
    }

    /// The location a memory access touches.
    pub fn location(&self) -> Option<MemoryLocation> {
        match self {
            Label::ReadAccess { location, .. } | Label::WriteAccess { location, .. } => {
                Some(*location)
            }
            _ => None,
        }
    }

    /// The monitor a lock, unlock, wait or notify operates on.
    pub fn mutex(&self) -> Option<ObjectId> {
        match self {
            Label::Lock { mutex, .. }
            | Label::Unlock { mutex, .. }
            | Label::Wait { mutex, .. }
            | Label::Notify { mutex, .. } => Some(*mutex),
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Label::WriteAccess { .. })
    }

    /// Whether this label writes `location`. The initialization writes every location.
    pub fn writes(&self, location: &MemoryLocation) -> bool {
        match self {
            Label::WriteAccess { location: l, .. } => l == location,
            Label::Initialization { .. } => true,
            _ => false,
        }
    }

    pub fn is_read_response(&self) -> bool {
        matches!(
            self,
            Label::ReadAccess {
                kind: LabelKind::Response,
                ..
            }
        )
    }

    pub fn is_exclusive_read_response(&self) -> bool {
        matches!(
            self,
            Label::ReadAccess {
                kind: LabelKind::Response,
                exclusive: true,
                ..
            }
        )
    }

    pub fn is_exclusive_write(&self) -> bool {
        matches!(
            self,
            Label::WriteAccess {
                exclusive: true,
                ..
            }
        )
    }

    /// The value a write stores, or the value the initialization provides for `location`.
    pub fn written_value(&self, location: &MemoryLocation) -> Option<ObjectId> {
        match self {
            Label::WriteAccess {
                location: l, value, ..
            } if l == location => Some(*value),
            Label::Initialization { initial_values } => {
                Some(initial_values.get(location).copied().unwrap_or(ObjectId::NULL))
            }
            _ => None,
        }
    }

    pub fn read_value(&self) -> Option<ObjectId> {
        match self {
            Label::ReadAccess { value, .. } => *value,
            _ => None,
        }
    }

    /// Whether this label releases its monitor to other threads.
    pub fn releases_monitor(&self) -> bool {
        matches!(self, Label::Unlock { depth, synthetic, .. } if *depth == 1 || *synthetic)
    }

    /// Whether this label takes a monitor that was free.
    pub fn acquires_monitor(&self) -> bool {
        matches!(
            self,
            Label::Lock {
                kind: LabelKind::Response,
                ..
            }
        )
    }

    /// A reentrant acquire of a monitor the thread already holds `depth - 1` times.
    pub fn reentrant_lock(mutex: ObjectId, depth: u32) -> Self {
        Label::Lock {
            kind: LabelKind::Send,
            mutex,
            depth,
            synthetic: false,
        }
    }

    /// Thread ids mentioned by thread-management labels.
    pub fn referenced_threads(&self) -> Vec<ThreadId> {
        match self {
            Label::ThreadFork { forked: set }
            | Label::ThreadFinish { finished: set }
            | Label::ThreadJoin { joined: set, .. } => set.iter().copied().collect(),
            Label::ThreadStart { thread, .. } => vec![*thread],
            _ => Vec::new(),
        }
    }

    /// Whether this response label completes `request`. This is a structural check on the
    /// operands; whether the dependencies justify it is checked by [`Label::synchronize`].
    pub fn is_response_to(&self, request: &Label) -> bool {
        use LabelKind::{Request, Response};
        match (request, self) {
            (
                Label::ReadAccess {
                    kind: Request,
                    location: l1,
                    exclusive: x1,
                    ..
                },
                Label::ReadAccess {
                    kind: Response,
                    location: l2,
                    exclusive: x2,
                    value: Some(_),
                },
            ) => l1 == l2 && x1 == x2,
            (
                Label::Lock {
                    kind: Request,
                    mutex: m1,
                    depth: d1,
                    synthetic: s1,
                },
                Label::Lock {
                    kind: Response,
                    mutex: m2,
                    depth: d2,
                    synthetic: s2,
                },
            ) => m1 == m2 && d1 == d2 && s1 == s2,
            (
                Label::Wait {
                    kind: Request,
                    mutex: m1,
                },
                Label::Wait {
                    kind: Response,
                    mutex: m2,
                },
            ) => m1 == m2,
            (
                Label::ThreadStart {
                    kind: Request,
                    thread: t1,
                },
                Label::ThreadStart {
                    kind: Response,
                    thread: t2,
                },
            ) => t1 == t2,
            (
                Label::ThreadJoin {
                    kind: Request,
                    joined,
                },
                Label::ThreadJoin {
                    kind: Response,
                    joined: remaining,
                },
            ) => !joined.is_empty() && remaining.is_empty(),
            _ => false,
        }
    }

    /// The synchronization algebra: combines two labels into the label that results when
    /// they meet, or `None` if they do not synchronize. The operation is commutative.
    ///
    /// ```
    /// use tangle_core::{Label, LabelKind, MemoryLocation, ObjectId};
    ///
    /// let x = MemoryLocation::Static(0);
    /// let write = Label::write(x, ObjectId::from(1), false);
    /// let request = Label::read_request(x, false);
    /// let response = Label::ReadAccess {
    ///     kind: LabelKind::Response,
    ///     location: x,
    ///     value: Some(ObjectId::from(1)),
    ///     exclusive: false,
    /// };
    /// assert_eq!(write.synchronize(&request), Some(response.clone()));
    /// assert_eq!(request.synchronize(&write), Some(response));
    /// ```
    pub fn synchronize(&self, other: &Label) -> Option<Label> {
        self.synchronized_by(other)
            .or_else(|| other.synchronized_by(self))
    }

    /// Folds a request with the labels of every dependency, in order.
    pub fn synchronize_all<'a>(
        &self,
        others: impl IntoIterator<Item = &'a Label>,
    ) -> Option<Label> {
        let mut acc = self.clone();
        for other in others {
            acc = acc.synchronize(other)?;
        }
        Some(acc)
    }

    /// `self` is the waiting side, `sender` the side it synchronizes into.
    fn synchronized_by(&self, sender: &Label) -> Option<Label> {
        use LabelKind::{Request, Response};
        match self {
            Label::ReadAccess {
                kind: Request,
                location,
                exclusive,
                ..
            } => sender.written_value(location).map(|value| Label::ReadAccess {
                kind: Response,
                location: *location,
                value: Some(value),
                exclusive: *exclusive,
            }),
            Label::ReadAccess { .. } => None,
            Label::Lock {
                kind: Request,
                mutex,
                depth,
                synthetic,
            } => {
                let free = match sender {
                    Label::Initialization { .. } => true,
                    Label::Unlock { mutex: m, .. } => m == mutex && sender.releases_monitor(),
                    _ => false,
                };
                free.then(|| Label::Lock {
                    kind: Response,
                    mutex: *mutex,
                    depth: *depth,
                    synthetic: *synthetic,
                })
            }
            Label::Lock { .. } => None,
            Label::Wait {
                kind: Request,
                mutex,
            } => match sender {
                Label::Notify { mutex: m, .. } if m == mutex => Some(Label::Wait {
                    kind: Response,
                    mutex: *mutex,
                }),
                _ => None,
            },
            Label::Wait { .. } => None,
            Label::ThreadStart {
                kind: Request,
                thread,
            } => match sender {
                Label::ThreadFork { forked } if forked.contains(thread) => {
                    Some(Label::ThreadStart {
                        kind: Response,
                        thread: *thread,
                    })
                }
                _ => None,
            },
            Label::ThreadStart { .. } => None,
            Label::ThreadJoin {
                kind: Request,
                joined,
            } => match sender {
                Label::ThreadFinish { finished } if !joined.is_disjoint(finished) => {
                    let remaining: ThreadSet = joined.difference(finished).copied().collect();
                    let kind = if remaining.is_empty() {
                        Response
                    } else {
                        Request
                    };
                    Some(Label::ThreadJoin {
                        kind,
                        joined: remaining,
                    })
                }
                _ => None,
            },
            Label::ThreadJoin { .. } => None,
            Label::Initialization { .. }
            | Label::ObjectAllocation { .. }
            | Label::WriteAccess { .. }
            | Label::Unlock { .. }
            | Label::Notify { .. }
            | Label::ThreadFork { .. }
            | Label::ThreadFinish { .. } => None,
        }
    }
}

fn phase(kind: LabelKind) -> &'static str {
    match kind {
        LabelKind::Send => "",
        LabelKind::Request => "^req",
        LabelKind::Response => "^rsp",
    }
}

struct Threads<'a>(&'a ThreadSet);

impl Display for Threads<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, t) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{t}")?;
        }
        f.write_str("}")
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Label::Initialization { .. } => f.write_str("Init"),
            Label::ObjectAllocation { object } => write!(f, "Alloc({object})"),
            Label::ReadAccess {
                kind,
                location,
                value,
                exclusive,
            } => {
                let x = if *exclusive { "X" } else { "" };
                match value {
                    Some(value) => write!(f, "Read{x}{}({location}, {value})", phase(*kind)),
                    None => write!(f, "Read{x}{}({location})", phase(*kind)),
                }
            }
            Label::WriteAccess {
                location,
                value,
                exclusive,
            } => {
                let x = if *exclusive { "X" } else { "" };
                write!(f, "Write{x}({location}, {value})")
            }
            Label::Lock {
                kind,
                mutex,
                depth,
                synthetic,
            } => {
                let star = if *synthetic { "*" } else { "" };
                if *depth > 1 && !*synthetic {
                    write!(f, "Lock{star}({mutex}, depth={depth})")
                } else {
                    write!(f, "Lock{star}{}({mutex})", phase(*kind))
                }
            }
            Label::Unlock {
                mutex,
                depth,
                synthetic,
            } => {
                let star = if *synthetic { "*" } else { "" };
                if *depth > 1 && !*synthetic {
                    write!(f, "Unlock{star}({mutex}, depth={depth})")
                } else {
                    write!(f, "Unlock{star}({mutex})")
                }
            }
            Label::Wait { kind, mutex } => write!(f, "Wait{}({mutex})", phase(*kind)),
            Label::Notify { mutex, broadcast } => {
                let all = if *broadcast { "All" } else { "" };
                write!(f, "Notify{all}({mutex})")
            }
            Label::ThreadFork { forked } => write!(f, "Fork({})", Threads(forked)),
            Label::ThreadStart { kind, thread } => write!(f, "Start{}({thread})", phase(*kind)),
            Label::ThreadFinish { finished } => write!(f, "Finish({})", Threads(finished)),
            Label::ThreadJoin { kind, joined } => {
                write!(f, "Join{}({})", phase(*kind), Threads(joined))
            }
        }
    }
}
