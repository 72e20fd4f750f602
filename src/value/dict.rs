use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rustc_hash::FxHashMap;

use super::{types::Type, Value};
use crate::sync;

/// Hashable projection of a primitive value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Int(i64),
    /// Compared by bit pattern.
    Float(u64),
    Bool(bool),
    Byte(u8),
    Char(char),
    String(Arc<str>),
}

impl DictKey {
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Int(i) => DictKey::Int(*i),
            Value::Float(f) => DictKey::Float(f.to_bits()),
            Value::Bool(b) => DictKey::Bool(*b),
            Value::Byte(b) => DictKey::Byte(*b),
            Value::Char(c) => DictKey::Char(*c),
            Value::String(s) => DictKey::String(s.clone()),
            Value::Element(element) => DictKey::String(Arc::from(element.render())),
            _ => return None,
        })
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Int(i) => Value::Int(*i),
            DictKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            DictKey::Bool(b) => Value::Bool(*b),
            DictKey::Byte(b) => Value::Byte(*b),
            DictKey::Char(c) => Value::Char(*c),
            DictKey::String(s) => Value::String(s.clone()),
        }
    }
}

/// Insertion ordered map.
#[derive(Debug, Default, Clone)]
pub struct OrderedMap {
    entries: Vec<(DictKey, Value)>,
    index: FxHashMap<DictKey, usize>,
}

impl OrderedMap {
    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, key: &DictKey) -> bool {
        self.index.contains_key(key)
    }

    /// Replaces in place when the key exists, so order is kept.
    pub fn insert(&mut self, key: DictKey, value: Value) -> Option<Value> {
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &DictKey) -> Option<Value> {
        let position = self.index.remove(key)?;
        let (_, value) = self.entries.remove(position);
        for (_, i) in self.index.iter_mut() {
            if *i > position {
                *i -= 1;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DictKey, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &DictKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }
}

#[derive(Debug)]
pub struct Dict {
    pub key_type: Type,
    pub value_type: Type,
    map: RwLock<OrderedMap>,
}

impl Dict {
    pub fn new(key_type: Type, value_type: Type, map: OrderedMap) -> Self {
        Self {
            key_type,
            value_type,
            map: RwLock::new(map),
        }
    }

    pub fn empty(key_type: Type, value_type: Type) -> Self {
        Self::new(key_type, value_type, OrderedMap::default())
    }

    pub fn read(&self) -> RwLockReadGuard<'_, OrderedMap> {
        sync::read(&self.map)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, OrderedMap> {
        sync::write(&self.map)
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        let key = DictKey::from_value(key)?;
        self.read().get(&key).cloned()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn key(s: &str) -> DictKey {
        DictKey::String(Arc::from(s))
    }

    #[test]
    fn test_insertion_order_survives_updates_and_removal() {
        let mut map = OrderedMap::default();
        map.insert(key("a"), Value::Int(1));
        map.insert(key("b"), Value::Int(2));
        map.insert(key("c"), Value::Int(3));
        map.insert(key("a"), Value::Int(10));
        map.remove(&key("b"));
        map.insert(key("d"), Value::Int(4));

        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec![key("a"), key("c"), key("d")]);
        assert_eq!(map.get(&key("a")), Some(&Value::Int(10)));
        assert_eq!(map.get(&key("d")), Some(&Value::Int(4)));
    }

    #[test]
    fn test_float_keys_use_bits() {
        assert_eq!(
            DictKey::from_value(&Value::Float(1.5)),
            Some(DictKey::Float(1.5f64.to_bits()))
        );
        assert_eq!(DictKey::from_value(&Value::Nil), None);
    }
}
