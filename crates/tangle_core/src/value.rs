use {
    crate::ObjectId,
    std::fmt::{self, Display, Formatter},
};

/// A value observed or produced by a simulated thread. Labels never store these directly;
/// they store the [`ObjectId`] an [`ObjectRegistry`](crate::ObjectRegistry) assigns.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// A reference, identified by the object's allocation.
    Object(ObjectId),
}

impl Value {
    pub fn is_primitive(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_))
    }

    /// Integer view used by arithmetic commands. `null` and `false` read as zero.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Null => Some(0),
            Value::Bool(b) => Some(*b as i64),
            Value::Int(n) => Some(*n),
            Value::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => Display::fmt(b, f),
            Value::Int(n) => Display::fmt(n, f),
            Value::Object(id) => Display::fmt(id, f),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        if id.is_null() {
            Value::Null
        } else {
            Value::Object(id)
        }
    }
}

/// A shared-memory location.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemoryLocation {
    /// A global (static) variable.
    Static(u32),
    Field { object: ObjectId, field: u32 },
    Array { object: ObjectId, index: u32 },
}

impl MemoryLocation {
    /// The object owning the location, if any.
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            MemoryLocation::Static(_) => None,
            MemoryLocation::Field { object, .. } | MemoryLocation::Array { object, .. } => {
                Some(*object)
            }
        }
    }
}

impl Display for MemoryLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MemoryLocation::Static(index) => write!(f, "g{index}"),
            MemoryLocation::Field { object, field } => write!(f, "{object}.f{field}"),
            MemoryLocation::Array { object, index } => write!(f, "{object}[{index}]"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic_view_treats_null_as_zero() {
        assert_eq!(Value::Null.as_int(), Some(0));
        assert_eq!(Value::from(true).as_int(), Some(1));
        assert_eq!(Value::from(-4).as_int(), Some(-4));
        assert_eq!(Value::Object(ObjectId::from(2)).as_int(), None);
    }

    #[test]
    fn null_object_id_converts_to_null() {
        assert_eq!(Value::from(ObjectId::NULL), Value::Null);
        assert_eq!(Value::from(ObjectId::from(5)).as_object(), Some(ObjectId::from(5)));
    }

    #[test]
    fn displays_locations() {
        let obj = ObjectId::from(3);
        assert_eq!(MemoryLocation::Static(1).to_string(), "g1");
        assert_eq!(MemoryLocation::Field { object: obj, field: 2 }.to_string(), "#3.f2");
        assert_eq!(MemoryLocation::Array { object: obj, index: 0 }.to_string(), "#3[0]");
        assert_eq!(MemoryLocation::Static(0).object(), None);
    }
}
