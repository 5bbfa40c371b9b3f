use {
    crate::{EventId, ObjectId, Value},
    std::collections::HashMap,
};

#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegistryEntry {
    pub id: ObjectId,
    /// The primitive value, or [`Value::Object`] for an object registered by identity.
    pub value: Value,
    /// The allocation event, if the object was allocated by a simulated thread.
    pub allocation: Option<EventId>,
}

/// Assigns dense, monotonically increasing [`ObjectId`]s to runtime values.
///
/// Id 0 is `null`. Primitives are interned by value, so equal primitives share an id.
/// Objects are registered by identity when they are allocated.
#[derive(Clone, Debug)]
pub struct ObjectRegistry {
    entries: Vec<RegistryEntry>,
    primitives: HashMap<Value, ObjectId>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        ObjectRegistry {
            entries: vec![RegistryEntry {
                id: ObjectId::NULL,
                value: Value::Null,
                allocation: None,
            }],
            primitives: HashMap::new(),
        }
    }

    fn next_id(&self) -> ObjectId {
        ObjectId::from(self.entries.len() as u32)
    }

    /// The id of a value, registering primitives on first sight. Objects must have been
    /// registered by [`ObjectRegistry::allocate`], so they map to themselves.
    pub fn intern(&mut self, value: &Value) -> ObjectId {
        match value {
            Value::Null => ObjectId::NULL,
            Value::Object(id) => *id,
            Value::Bool(_) | Value::Int(_) => {
                if let Some(id) = self.primitives.get(value) {
                    return *id;
                }
                let id = self.next_id();
                self.entries.push(RegistryEntry {
                    id,
                    value: value.clone(),
                    allocation: None,
                });
                self.primitives.insert(value.clone(), id);
                id
            }
        }
    }

    /// Registers a fresh object.
    pub fn allocate(&mut self, allocation: Option<EventId>) -> ObjectId {
        let id = self.next_id();
        self.entries.push(RegistryEntry {
            id,
            value: Value::Object(id),
            allocation,
        });
        id
    }

    /// Records the event that allocated `id`, for objects registered before the event existed.
    pub fn set_allocation(&mut self, id: ObjectId, allocation: EventId) {
        if let Some(entry) = self.entries.get_mut(id.index()) {
            entry.allocation = Some(allocation);
        }
    }

    pub fn entry(&self, id: ObjectId) -> Option<&RegistryEntry> {
        self.entries.get(id.index())
    }

    /// The runtime value an id stands for.
    pub fn value(&self, id: ObjectId) -> Option<Value> {
        self.entry(id).map(|entry| entry.value.clone())
    }

    pub fn allocation(&self, id: ObjectId) -> Option<EventId> {
        self.entry(id).and_then(|entry| entry.allocation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Forgets every value except `null`.
    pub fn reset(&mut self) {
        self.entries.truncate(1);
        self.primitives.clear();
    }
}
