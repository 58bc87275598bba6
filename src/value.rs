//! Runtime values for encoding/decoding (codec representation).

/// A single value of any supported type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Bool(bool),
    /// Enumerated value by item name.
    Enum(String),
    Octets(Vec<u8>),
    Bits(Vec<bool>),
    Chars(String),
    Union { alt: String, value: Box<Value> },
    List(Vec<Value>),
    /// Record or set: one slot per declared field, in declaration order.
    Record(Vec<Slot>),
}

/// State of one record/set field.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Slot {
    #[default]
    Unbound,
    Omit,
    Present(Value),
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Slot::Present(v)
    }
}

impl Slot {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Slot::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Slot::Present(_))
    }

    pub fn is_bound(&self) -> bool {
        match self {
            Slot::Unbound => false,
            Slot::Omit => true,
            Slot::Present(v) => v.is_bound(),
        }
    }
}

impl Value {
    pub fn octets(bytes: &[u8]) -> Value {
        Value::Octets(bytes.to_vec())
    }

    pub fn enumerated(name: &str) -> Value {
        Value::Enum(name.to_string())
    }

    pub fn union(alt: &str, value: Value) -> Value {
        Value::Union {
            alt: alt.to_string(),
            value: Box::new(value),
        }
    }

    /// Record from present values, in declaration order.
    pub fn record<I: IntoIterator<Item = Value>>(values: I) -> Value {
        Value::Record(values.into_iter().map(Slot::Present).collect())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&str> {
        match self {
            Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_octets(&self) -> Option<&[u8]> {
        match self {
            Value::Octets(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Chars(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&[Slot]> {
        match self {
            Value::Record(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_union(&self) -> Option<(&str, &Value)> {
        match self {
            Value::Union { alt, value } => Some((alt, value)),
            _ => None,
        }
    }

    /// Present field `i` of a record/set value.
    pub fn field(&self, i: usize) -> Option<&Value> {
        self.as_record().and_then(|s| s.get(i)).and_then(Slot::value)
    }

    pub fn slot(&self, i: usize) -> Option<&Slot> {
        self.as_record().and_then(|s| s.get(i))
    }

    /// A record is bound when at least one field is bound (an omitted field counts).
    pub fn is_bound(&self) -> bool {
        match self {
            Value::Record(slots) => slots.iter().any(Slot::is_bound),
            _ => true,
        }
    }

    /// Fully initialized: every field bound all the way down.
    pub fn is_value(&self) -> bool {
        match self {
            Value::Record(slots) => slots.iter().all(|s| match s {
                Slot::Unbound => false,
                Slot::Omit => true,
                Slot::Present(v) => v.is_value(),
            }),
            Value::Union { value, .. } => value.is_value(),
            Value::List(items) => items.iter().all(Value::is_value),
            _ => true,
        }
    }

    /// Number of present fields of a record/set, elements of a list.
    pub fn size_of(&self) -> Option<usize> {
        match self {
            Value::Record(slots) => Some(slots.iter().filter(|s| s.is_present()).count()),
            Value::List(items) => Some(items.len()),
            _ => None,
        }
    }
}
