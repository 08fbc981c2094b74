//! Mock-metadata library: introspects a live value into a serialisable
//! shape and re-materialises a mock from it, plus the recording mock
//! function delivered everywhere a callable is replaced.

use crate::error::Result;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A recording no-op callable. Calls are recorded with their arguments;
/// an optional implementation supplies behaviour. Mock functions also
/// carry a property bag so statics attached to a mocked function survive.
pub struct MockFn {
    name: RefCell<String>,
    calls: RefCell<Vec<Vec<Value>>>,
    implementation: RefCell<Option<Rc<dyn Fn(&[Value]) -> Result<Value>>>>,
    props: RefCell<BTreeMap<String, Value>>,
}

impl MockFn {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: RefCell::new(name.into()),
            calls: RefCell::new(Vec::new()),
            implementation: RefCell::new(None),
            props: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn with_implementation(func: impl Fn(&[Value]) -> Result<Value> + 'static) -> Self {
        let mock = Self::new();
        mock.set_implementation(func);
        mock
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.borrow_mut() = name.into();
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.calls.borrow_mut().push(args.to_vec());
        let implementation = self.implementation.borrow().clone();
        match implementation {
            Some(func) => func(args),
            None => Ok(Value::Undefined),
        }
    }

    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Drop recorded calls; the implementation is kept.
    pub fn mock_clear(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn set_implementation(&self, func: impl Fn(&[Value]) -> Result<Value> + 'static) {
        *self.implementation.borrow_mut() = Some(Rc::new(func));
    }

    pub fn mock_return_value(&self, value: Value) {
        self.set_implementation(move |_| Ok(value.clone()));
    }

    pub(crate) fn get_prop(&self, key: &str) -> Value {
        self.props
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    pub(crate) fn set_prop(&self, key: impl Into<String>, value: Value) {
        self.props.borrow_mut().insert(key.into(), value);
    }

    pub(crate) fn prop_keys(&self) -> Vec<String> {
        self.props.borrow().keys().cloned().collect()
    }

    pub(crate) fn prop_entries(&self) -> Vec<(String, Value)> {
        self.props
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for MockFn {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialisable shape of a live value, sufficient to regenerate a mock
/// with the same surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MockMetadata {
    Constant(ConstantValue),
    Function {
        name: String,
        members: Vec<(String, MockMetadata)>,
    },
    Object {
        members: Vec<(String, MockMetadata)>,
    },
    Array {
        items: Vec<MockMetadata>,
    },
    /// Placeholder introduced where introspection met a reference cycle;
    /// regenerates as an empty bag.
    Ref,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConstantValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// The metadata library itself. Stateless; held by the runtime as a
/// collaborator.
#[derive(Debug, Default)]
pub struct Mocker;

impl Mocker {
    pub fn new() -> Self {
        Mocker
    }

    /// Introspect a live value. `None` signals an exports value no mock
    /// can be derived from.
    pub fn get_metadata(&self, value: &Value) -> Option<MockMetadata> {
        if value.is_undefined() {
            return None;
        }
        let mut visited = Vec::new();
        Some(self.metadata_of(value, &mut visited))
    }

    fn metadata_of(&self, value: &Value, visited: &mut Vec<usize>) -> MockMetadata {
        match value {
            Value::Undefined => MockMetadata::Constant(ConstantValue::Undefined),
            Value::Null => MockMetadata::Constant(ConstantValue::Null),
            Value::Bool(b) => MockMetadata::Constant(ConstantValue::Bool(*b)),
            Value::Number(n) => MockMetadata::Constant(ConstantValue::Number(*n)),
            Value::String(s) => MockMetadata::Constant(ConstantValue::String(s.clone())),
            Value::Array(items) => {
                let address = Rc::as_ptr(items) as usize;
                if visited.contains(&address) {
                    return MockMetadata::Ref;
                }
                visited.push(address);
                let metadata = MockMetadata::Array {
                    items: items
                        .borrow()
                        .iter()
                        .map(|item| self.metadata_of(item, visited))
                        .collect(),
                };
                visited.pop();
                metadata
            }
            Value::Object(data) => {
                let address = Rc::as_ptr(data) as usize;
                if visited.contains(&address) {
                    return MockMetadata::Ref;
                }
                visited.push(address);
                let metadata = MockMetadata::Object {
                    members: value
                        .entries()
                        .iter()
                        .map(|(key, entry)| (key.clone(), self.metadata_of(entry, visited)))
                        .collect(),
                };
                visited.pop();
                metadata
            }
            Value::Function(func) => MockMetadata::Function {
                name: func.name.clone(),
                members: Vec::new(),
            },
            Value::Mock(mock) => MockMetadata::Function {
                name: mock.name(),
                members: mock
                    .prop_entries()
                    .iter()
                    .map(|(key, entry)| (key.clone(), self.metadata_of(entry, visited)))
                    .collect(),
            },
        }
    }

    /// Regenerate a fresh mock value from metadata. Every function slot
    /// becomes a new recording mock with no implementation.
    pub fn generate_from_metadata(&self, metadata: &MockMetadata) -> Value {
        match metadata {
            MockMetadata::Constant(constant) => match constant {
                ConstantValue::Undefined => Value::Undefined,
                ConstantValue::Null => Value::Null,
                ConstantValue::Bool(b) => Value::Bool(*b),
                ConstantValue::Number(n) => Value::Number(*n),
                ConstantValue::String(s) => Value::String(s.clone()),
            },
            MockMetadata::Function { name, members } => {
                let mock = MockFn::named(name.clone());
                for (key, member) in members {
                    mock.set_prop(key.clone(), self.generate_from_metadata(member));
                }
                Value::Mock(Rc::new(mock))
            }
            MockMetadata::Object { members } => Value::object_from(
                members
                    .iter()
                    .map(|(key, member)| (key.clone(), self.generate_from_metadata(member))),
            ),
            MockMetadata::Array { items } => {
                Value::array(items.iter().map(|i| self.generate_from_metadata(i)).collect())
            }
            MockMetadata::Ref => Value::object(),
        }
    }

    pub fn mock_function(&self) -> Value {
        Value::mock_fn()
    }

    pub fn is_mock_function(value: &Value) -> bool {
        matches!(value, Value::Mock(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fn_records_calls() {
        let mock = MockFn::new();
        assert_eq!(mock.call(&[Value::Number(1.0)]).unwrap(), Value::Undefined);
        assert_eq!(mock.call(&[Value::Number(2.0)]).unwrap(), Value::Undefined);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.calls()[1], vec![Value::Number(2.0)]);

        mock.mock_clear();
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn test_mock_fn_implementation() {
        let mock = MockFn::with_implementation(|args| Ok(args[0].clone()));
        assert_eq!(
            mock.call(&[Value::String("echo".to_string())]).unwrap(),
            Value::String("echo".to_string())
        );
    }

    #[test]
    fn test_automock_replaces_functions_and_keeps_constants() {
        let mocker = Mocker::new();
        let exports = Value::object();
        exports.set("k", Value::function("k", |_| Ok(Value::Number(7.0))));
        exports.set("version", Value::Number(3.0));

        let metadata = mocker.get_metadata(&exports).unwrap();
        let mock = mocker.generate_from_metadata(&metadata);

        assert_eq!(mock.get("version"), Value::Number(3.0));
        let k = mock.get("k");
        assert!(Mocker::is_mock_function(&k));
        // The generated stand-in answers undefined, never runs the original.
        assert_eq!(k.call(&[]).unwrap(), Value::Undefined);
        assert_eq!(k.as_mock().unwrap().call_count(), 1);
    }

    #[test]
    fn test_metadata_terminates_on_cycles() {
        let mocker = Mocker::new();
        let exports = Value::object();
        exports.set("self", exports.clone());

        let metadata = mocker.get_metadata(&exports).unwrap();
        let mock = mocker.generate_from_metadata(&metadata);
        // The back-reference degrades to an empty bag instead of recursing.
        assert_eq!(mock.get("self").keys().len(), 0);
    }

    #[test]
    fn test_get_metadata_refuses_undefined() {
        let mocker = Mocker::new();
        assert!(mocker.get_metadata(&Value::Undefined).is_none());
    }
}
