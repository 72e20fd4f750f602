pub mod dict;
pub mod element;
pub mod function;
pub mod prototype;
pub mod structs;
pub mod types;

use std::{
    fmt::Display,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{ast::Signal, error::ExecutionErrorKind, sync};

use self::{
    dict::{Dict, DictKey, OrderedMap},
    element::Element,
    function::Function,
    structs::{StructDefinition, StructInstance},
    types::Type,
};

#[derive(Debug)]
pub struct List {
    pub item_type: Type,
    items: RwLock<Vec<Value>>,
}

impl List {
    pub fn new(items: Vec<Value>, item_type: Type) -> Self {
        Self {
            item_type,
            items: RwLock::new(items),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        sync::read(&self.items)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        sync::write(&self.items)
    }
}

/// Runtime value. Lists, dicts, elements and struct instances are shared
/// references; `deep_clone` copies them.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Byte(u8),
    Char(char),
    String(Arc<str>),
    List(Arc<List>),
    Dict(Arc<Dict>),
    Element(Arc<Element>),
    Function(Arc<Function>),
    StructDef(Arc<StructDefinition>),
    StructInstance(Arc<StructInstance>),
    Nil,
    Signal(Signal),
    Ref(Arc<RwLock<Value>>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>, item_type: Type) -> Self {
        Value::List(Arc::new(List::new(items, item_type)))
    }

    /// Fails when a key is not a hashable primitive.
    pub fn dict(
        entries: Vec<(Value, Value)>,
        key_type: Type,
        value_type: Type,
    ) -> Result<Self, ExecutionErrorKind> {
        let mut map = OrderedMap::default();
        for (key, value) in entries {
            let Some(hashed) = DictKey::from_value(&key) else {
                return Err(ExecutionErrorKind::UnhashableKey(key.type_of().to_string()));
            };
            map.insert(hashed, value);
        }
        Ok(Value::Dict(Arc::new(Dict::new(key_type, value_type, map))))
    }

    pub fn function(function: Function) -> Self {
        Value::Function(Arc::new(function))
    }

    pub fn reference(value: Value) -> Self {
        Value::Ref(Arc::new(RwLock::new(value)))
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::Int(_) => Type::INT,
            Value::Float(_) => Type::FLOAT,
            Value::Bool(_) => Type::BOOL,
            Value::Byte(_) => Type::BYTE,
            Value::Char(_) => Type::CHAR,
            Value::String(_) => Type::STRING,
            Value::List(list) => Type::list(list.item_type.clone()),
            Value::Dict(dict) => Type::dict(dict.key_type.clone(), dict.value_type.clone()),
            Value::Element(_) => Type::HTML,
            Value::Function(function) => function.type_of(),
            Value::StructDef(definition) => definition.definition_type(),
            Value::StructInstance(instance) => instance.definition.instance_type(),
            Value::Nil => Type::NIL,
            Value::Signal(_) => Type::VOID,
            Value::Ref(inner) => Type::Ref(Box::new(sync::read(inner).type_of())),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn deep_clone(&self) -> Value {
        match self {
            Value::List(list) => Value::list(
                list.read().iter().map(Value::deep_clone).collect(),
                list.item_type.clone(),
            ),
            Value::Dict(dict) => {
                let mut map = OrderedMap::default();
                for (key, value) in dict.read().iter() {
                    map.insert(key.clone(), value.deep_clone());
                }
                Value::Dict(Arc::new(Dict::new(
                    dict.key_type.clone(),
                    dict.value_type.clone(),
                    map,
                )))
            }
            Value::Element(element) => Value::Element(Arc::new(element.deep_clone())),
            Value::StructInstance(instance) => {
                Value::StructInstance(Arc::new(instance.deep_clone()))
            }
            other => other.clone(),
        }
    }

    /// `(type) value`, with strings quoted.
    pub fn inspect(&self) -> String {
        format!("({}) {}", self.type_of(), self.repr())
    }

    /// Like `Display`, but strings and chars are quoted.
    pub fn repr(&self) -> String {
        match self {
            Value::String(s) => format!("{s:?}"),
            Value::Char(c) => format!("{c:?}"),
            other => other.to_string(),
        }
    }

    /// Snapshot of `(key, value)` pairs for `for` loops.
    pub fn iterate(&self) -> Result<Vec<(Value, Value)>, ExecutionErrorKind> {
        Ok(match self {
            Value::Int(n) => (0..*n).map(|i| (Value::Int(i), Value::Int(i))).collect(),
            Value::String(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (Value::Int(i as i64), Value::Char(c)))
                .collect(),
            Value::List(list) => list
                .read()
                .iter()
                .enumerate()
                .map(|(i, item)| (Value::Int(i as i64), item.clone()))
                .collect(),
            Value::Dict(dict) => dict
                .read()
                .iter()
                .map(|(key, value)| (key.to_value(), value.clone()))
                .collect(),
            Value::StructInstance(instance) => {
                let values = instance.fields();
                instance
                    .definition
                    .fields
                    .iter()
                    .zip(values.iter())
                    .filter(|(field, _)| !field.private)
                    .map(|(field, value)| (Value::string(&field.name), value.clone()))
                    .collect()
            }
            Value::Ref(inner) => return sync::read(inner).iterate(),
            other => return Err(ExecutionErrorKind::NotIterable(other.type_of().to_string())),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Element(a), Value::String(b)) | (Value::String(b), Value::Element(a)) => {
                *a.render() == **b
            }
            (Value::Nil, Value::Nil) => true,
            (Value::Signal(a), Value::Signal(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Arc::ptr_eq(a, b) || *a.read() == *b.read()
            }
            (Value::Dict(a), Value::Dict(b)) => {
                Arc::ptr_eq(a, b) || {
                    let (a, b) = (a.read(), b.read());
                    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
                }
            }
            (Value::Element(a), Value::Element(b)) => {
                Arc::ptr_eq(a, b) || a.render() == b.render()
            }
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::StructDef(a), Value::StructDef(b)) => a.id == b.id,
            (Value::StructInstance(a), Value::StructInstance(b)) => Arc::ptr_eq(a, b),
            (Value::Ref(a), Value::Ref(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Byte(b) => write!(f, "{b}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(list) => {
                let items: Vec<String> = list.read().iter().map(Value::repr).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Dict(dict) => {
                let entries: Vec<String> = dict
                    .read()
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key.to_value().repr(), value.repr()))
                    .collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Value::Element(element) => write!(f, "{}", element.render()),
            Value::Function(function) => write!(f, "(closure) {}", function.type_of()),
            Value::StructDef(definition) => write!(f, "struct {}", definition.name),
            Value::StructInstance(instance) => {
                let values = instance.fields();
                let fields: Vec<String> = instance
                    .definition
                    .fields
                    .iter()
                    .zip(values.iter())
                    .filter(|(field, _)| !field.private)
                    .map(|(field, value)| format!("{}: {}", field.name, value.repr()))
                    .collect();
                write!(f, "{}{{{}}}", instance.definition.name, fields.join(", "))
            }
            Value::Nil => write!(f, "nil"),
            Value::Signal(Signal::Break) => write!(f, "break"),
            Value::Signal(Signal::Continue) => write!(f, "continue"),
            Value::Ref(inner) => write!(f, "{}", sync::read(inner)),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_display() {
        let list = Value::list(
            vec![Value::Int(1), Value::string("a"), Value::Float(2.5)],
            Type::ANY,
        );
        assert_eq!(list.to_string(), "[1, \"a\", 2.5]");
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(Value::string("hi").inspect(), "(string) \"hi\"");

        let dict = Value::dict(
            vec![(Value::string("a"), Value::Int(1))],
            Type::STRING,
            Type::INT,
        )
        .unwrap();
        assert_eq!(dict.to_string(), "{\"a\": 1}");
        assert_eq!(dict.type_of().to_string(), "dict[string, int]");
    }

    #[test]
    fn test_deep_clone_detaches_lists() {
        let original = Value::list(vec![Value::Int(1)], Type::INT);
        let shared = original.clone();
        let copy = original.deep_clone();
        if let Value::List(list) = &shared {
            list.write().push(Value::Int(2));
        }
        assert_eq!(original.to_string(), "[1, 2]");
        assert_eq!(copy.to_string(), "[1]");
    }

    #[test]
    fn test_unhashable_key() {
        let key = Value::list(vec![], Type::ANY);
        let err = Value::dict(vec![(key, Value::Nil)], Type::ANY, Type::ANY).unwrap_err();
        assert!(matches!(err, ExecutionErrorKind::UnhashableKey(_)));
    }

    #[test]
    fn test_iterate() {
        let pairs = Value::Int(3).iterate().unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2], (Value::Int(2), Value::Int(2)));

        let pairs = Value::string("ab").iterate().unwrap();
        assert_eq!(pairs[1], (Value::Int(1), Value::Char('b')));

        assert!(Value::Bool(true).iterate().is_err());
    }
}
