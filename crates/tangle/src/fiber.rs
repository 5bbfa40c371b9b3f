use {
    crate::Sdk,
    corosensei::{stack::DefaultStack, CoroutineResult, ScopedCoroutine},
    tangle_core::{Command, Outcome, Step},
};

/// A simulated thread. The body runs on its own stack and suspends at every [`Sdk`] call.
pub struct Fiber<'a>(ScopedCoroutine<'a, Outcome, Command, (), DefaultStack>);

impl<'a> Fiber<'a> {
    pub fn new(behavior: impl FnOnce(Sdk<'_>) + 'a) -> Self {
        Self(ScopedCoroutine::new(move |yielder, started| {
            let id = match started {
                Outcome::Started(id) => id,
                _ => unreachable!(),
            };
            behavior(Sdk(yielder, id))
        }))
    }
}

impl Step for Fiber<'_> {
    fn step(&mut self, outcome: Outcome) -> Command {
        match self.0.resume(outcome) {
            CoroutineResult::Yield(command) => command,
            CoroutineResult::Return(()) => Command::Exit,
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        tangle_core::{MemoryLocation, ThreadId, Value},
    };

    #[test]
    fn yields_commands_in_program_order() {
        let x = MemoryLocation::Static(0);
        let mut fiber = Fiber::new(move |sdk| {
            let seen = sdk.read(x);
            sdk.write(x, seen.as_int().unwrap_or(0) + 1);
        });
        assert_eq!(
            fiber.step(Outcome::Started(ThreadId::from(1))),
            Command::Read {
                location: x,
                exclusive: false
            }
        );
        assert_eq!(
            fiber.step(Outcome::Value(Value::Int(41))),
            Command::Write {
                location: x,
                value: Value::Int(42),
                exclusive: false
            }
        );
        assert_eq!(fiber.step(Outcome::Done), Command::Exit);
    }

    #[test]
    fn exit_ends_the_body() {
        let mut fiber = Fiber::new(|sdk| {
            if sdk.id() == ThreadId::from(2) {
                sdk.exit();
            }
            sdk.alloc();
        });
        assert_eq!(
            fiber.step(Outcome::Started(ThreadId::from(2))),
            Command::Exit
        );
    }
}
