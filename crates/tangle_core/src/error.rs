use {
    crate::{EventId, Label, MemoryLocation, ObjectId, ThreadId},
    thiserror::Error,
};

/// A malformed event construction or an illegal use of the instrumentation interface.
///
/// These indicate a defect in the program under test or in the instrumentation driving it,
/// never a consistency violation.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[non_exhaustive]
pub enum StructuralError {
    #[error("thread {0} is not tracked by this execution")]
    UntrackedThread(ThreadId),
    #[error("event {0} is not part of this execution")]
    UnknownEvent(EventId),
    #[error("the execution already has an initialization event")]
    AlreadyInitialized,
    #[error("the execution has no initialization event")]
    Uninitialized,
    #[error("only the initialization event may be placed on thread {}", ThreadId::INIT)]
    InitThread,
    #[error("response {label} on thread {thread} does not follow a request")]
    ResponseWithoutRequest { thread: ThreadId, label: Label },
    #[error("response {response} does not match request {request}")]
    MismatchedResponse { request: Label, response: Label },
    #[error("thread {thread} must answer pending request {request} before issuing {label}")]
    PendingRequest {
        thread: ThreadId,
        request: Label,
        label: Label,
    },
    #[error("response {response} is not justified by its dependencies")]
    UnjustifiedResponse { response: Label },
    #[error("{0} does not synchronize, so it cannot have dependencies")]
    UnexpectedDependencies(Label),
    #[error("event {0} was created against a program-order parent that is no longer last")]
    StaleEvent(EventId),
    #[error("exclusive write to {0} does not follow an exclusive read of the same location")]
    UnpairedExclusiveWrite(MemoryLocation),
    #[error("dependency {0} already observes the new event's parent")]
    CausalCycle(EventId),
    #[error("thread {thread} does not own monitor {mutex}")]
    IllegalMonitorState { thread: ThreadId, mutex: ObjectId },
    #[error("thread {0} cannot be forked")]
    IllegalFork(ThreadId),
    #[error("thread {0} cannot be joined")]
    IllegalJoin(ThreadId),
}
