use crate::error::{Error, Result};
use crate::mocker::MockFn;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Shared mutable property bag behind every object value. Cloning a
/// `Value::Object` clones the handle, not the bag, so two holders observe
/// each other's writes. This is what lets a module captured mid-cycle see
/// fields assigned after the capture.
pub struct ObjectData {
    entries: RefCell<BTreeMap<String, Value>>,
    frozen: Cell<bool>,
}

impl ObjectData {
    fn new() -> Self {
        Self {
            entries: RefCell::new(BTreeMap::new()),
            frozen: Cell::new(false),
        }
    }
}

/// A host function callable from module bodies.
pub struct NativeFn {
    pub name: String,
    func: Box<dyn Fn(&[Value]) -> Result<Value>>,
}

impl NativeFn {
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

/// Runtime value delivered to and produced by module bodies.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<ObjectData>),
    Function(Rc<NativeFn>),
    /// A recording mock function; the marker checked by registry reset.
    Mock(Rc<MockFn>),
}

impl Value {
    /// Fresh empty object bag.
    pub fn object() -> Value {
        Value::Object(Rc::new(ObjectData::new()))
    }

    pub fn object_from<I>(entries: I) -> Value
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let value = Value::object();
        for (key, entry) in entries {
            value.set(key, entry);
        }
        value
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn function(
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) -> Value {
        Value::Function(Rc::new(NativeFn {
            name: name.into(),
            func: Box::new(func),
        }))
    }

    pub fn mock_fn() -> Value {
        Value::Mock(Rc::new(MockFn::new()))
    }

    /// Property read; `Undefined` for missing keys and non-objects. Mock
    /// functions expose their property bag the way host functions do.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(data) => data
                .entries
                .borrow()
                .get(key)
                .cloned()
                .unwrap_or(Value::Undefined),
            Value::Mock(mock) => mock.get_prop(key),
            _ => Value::Undefined,
        }
    }

    /// Property write. Writes to frozen bags and non-objects are dropped.
    pub fn set(&self, key: impl Into<String>, entry: Value) {
        match self {
            Value::Object(data) => {
                if !data.frozen.get() {
                    data.entries.borrow_mut().insert(key.into(), entry);
                }
            }
            Value::Mock(mock) => mock.set_prop(key, entry),
            _ => {}
        }
    }

    /// Append to an array value; no-op on anything else.
    pub fn push(&self, item: Value) {
        if let Value::Array(items) = self {
            items.borrow_mut().push(item);
        }
    }

    pub fn delete(&self, key: &str) {
        if let Value::Object(data) = self {
            if !data.frozen.get() {
                data.entries.borrow_mut().remove(key);
            }
        }
    }

    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(data) => data.entries.borrow().keys().cloned().collect(),
            Value::Mock(mock) => mock.prop_keys(),
            _ => Vec::new(),
        }
    }

    /// Snapshot of the bag's own entries.
    pub fn entries(&self) -> Vec<(String, Value)> {
        match self {
            Value::Object(data) => data
                .entries
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Value::Mock(mock) => mock.prop_entries(),
            _ => Vec::new(),
        }
    }

    pub fn freeze(&self) -> &Value {
        if let Value::Object(data) = self {
            data.frozen.set(true);
        }
        self
    }

    pub fn is_frozen(&self) -> bool {
        match self {
            Value::Object(data) => data.frozen.get(),
            _ => false,
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(f) => f.call(args),
            Value::Mock(m) => m.call(args),
            other => Err(Error::execution(format!(
                "value of type {} is not callable",
                other.type_name()
            ))),
        }
    }

    pub fn as_mock(&self) -> Option<&Rc<MockFn>> {
        match self {
            Value::Mock(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Mock(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Mock(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Mock(_) => "function",
        }
    }

    /// Convert a JSON document produced by the sandbox's parser.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object_from(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))),
            ),
        }
    }
}

impl PartialEq for Value {
    /// Primitives compare by value; reference types by identity, the way
    /// module exports are compared across cache hits.
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Mock(a), Value::Mock(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(data) => {
                write!(f, "{{")?;
                for (i, (key, entry)) in data.entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, entry)?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Mock(_) => write!(f, "<mock function>"),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_handles_share_the_bag() {
        let first = Value::object();
        let second = first.clone();
        first.set("n", Value::Number(1.0));
        assert_eq!(second.get("n"), Value::Number(1.0));
        assert_eq!(first, second);
        assert_ne!(first, Value::object());
    }

    #[test]
    fn test_frozen_bag_ignores_writes() {
        let bag = Value::object();
        bag.set("k", Value::Number(1.0));
        bag.freeze();
        bag.set("k", Value::Number(2.0));
        bag.set("other", Value::Null);
        assert_eq!(bag.get("k"), Value::Number(1.0));
        assert!(bag.get("other").is_undefined());
    }

    #[test]
    fn test_native_function_call() {
        let double = Value::function("double", |args| {
            let n = args.first().and_then(Value::as_number).unwrap_or(0.0);
            Ok(Value::Number(n * 2.0))
        });
        assert_eq!(
            double.call(&[Value::Number(21.0)]).unwrap(),
            Value::Number(42.0)
        );
        assert!(Value::Null.call(&[]).is_err());
    }

    #[test]
    fn test_from_json() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": [true, null], "c": "x"}"#).unwrap();
        let value = Value::from_json(&json);
        assert_eq!(value.get("a"), Value::Number(1.0));
        assert_eq!(value.get("c"), Value::String("x".to_string()));
        assert_eq!(value.get("b").type_name(), "array");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::object().is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
    }
}
