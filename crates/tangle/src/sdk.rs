use {
    corosensei::Yielder,
    tangle_core::{Command, MemoryLocation, ObjectId, Outcome, ThreadId, Value},
};

/// The operations a [`Fiber`](crate::Fiber) body can perform on shared state.
///
/// Every call is a scheduling point: the thread suspends until the driver answers.
pub struct Sdk<'a>(pub(crate) &'a Yielder<Outcome, Command>, pub(crate) ThreadId);

impl<'a> Sdk<'a> {
    pub fn exit(&self) -> ! {
        self.0.suspend(Command::Exit);
        unreachable!();
    }

    pub fn id(&self) -> ThreadId {
        self.1
    }

    pub fn read(&self, location: MemoryLocation) -> Value {
        self.load(location, false)
    }

    pub fn write(&self, location: MemoryLocation, value: impl Into<Value>) {
        self.store(location, value.into(), false)
    }

    /// The first half of a read-modify-write. Must be followed by
    /// [`Sdk::write_exclusive`] to the same location.
    pub fn read_exclusive(&self, location: MemoryLocation) -> Value {
        self.load(location, true)
    }

    pub fn write_exclusive(&self, location: MemoryLocation, value: impl Into<Value>) {
        self.store(location, value.into(), true)
    }

    pub fn compare_and_set(
        &self,
        location: MemoryLocation,
        expected: impl Into<Value>,
        new: impl Into<Value>,
    ) -> bool {
        let command = Command::CompareAndSet {
            location,
            expected: expected.into(),
            new: new.into(),
        };
        match self.0.suspend(command) {
            Outcome::Success(success) => success,
            _ => unreachable!(),
        }
    }

    /// Atomically adds `delta` and returns the previous value. Null counts as zero.
    pub fn fetch_add(&self, location: MemoryLocation, delta: i64) -> i64 {
        match self.0.suspend(Command::FetchAdd { location, delta }) {
            Outcome::Value(previous) => previous.as_int().unwrap_or_default(),
            _ => unreachable!(),
        }
    }

    pub fn alloc(&self) -> ObjectId {
        match self.0.suspend(Command::Alloc) {
            Outcome::Allocated(object) => object,
            _ => unreachable!(),
        }
    }

    /// Acquires the monitor of `object`. Reentrant.
    pub fn lock(&self, object: ObjectId) {
        self.command(Command::Lock(object))
    }

    pub fn unlock(&self, object: ObjectId) {
        self.command(Command::Unlock(object))
    }

    /// Runs `f` while holding the monitor of `object`.
    pub fn synchronized<R>(&self, object: ObjectId, f: impl FnOnce() -> R) -> R {
        self.lock(object);
        let result = f();
        self.unlock(object);
        result
    }

    /// Releases the monitor of `object` until another thread notifies it, then reacquires it
    /// at the same depth.
    pub fn wait(&self, object: ObjectId) {
        self.command(Command::Wait(object))
    }

    pub fn notify(&self, object: ObjectId) {
        self.command(Command::Notify(object))
    }

    pub fn notify_all(&self, object: ObjectId) {
        self.command(Command::NotifyAll(object))
    }

    /// Starts threads that were spawned suspended.
    pub fn fork(&self, threads: &[ThreadId]) {
        self.command(Command::Fork(threads.to_vec()))
    }

    /// Blocks until every thread in `threads` has exited.
    pub fn join(&self, threads: &[ThreadId]) {
        self.command(Command::Join(threads.to_vec()))
    }

    fn load(&self, location: MemoryLocation, exclusive: bool) -> Value {
        match self.0.suspend(Command::Read {
            location,
            exclusive,
        }) {
            Outcome::Value(value) => value,
            _ => unreachable!(),
        }
    }

    fn store(&self, location: MemoryLocation, value: Value, exclusive: bool) {
        self.command(Command::Write {
            location,
            value,
            exclusive,
        })
    }

    fn command(&self, command: Command) {
        let outcome = self.0.suspend(command);
        assert!(matches!(outcome, Outcome::Done));
    }
}
