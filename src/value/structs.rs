use std::{
    any::Any,
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use super::{prototype::Prototype, types::Type, Value};
use crate::sync;

static NEXT_STRUCT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    pub private: bool,
}

#[derive(Debug)]
pub struct StructDefinition {
    pub id: u64,
    pub name: Arc<str>,
    pub fields: Vec<StructField>,
    pub prototype: Prototype,
}

impl StructDefinition {
    pub fn new(name: &str, fields: Vec<StructField>) -> Self {
        Self {
            id: NEXT_STRUCT_ID.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
            fields,
            prototype: Prototype::new(name),
        }
    }

    pub fn instance_type(&self) -> Type {
        Type::Struct {
            id: self.id,
            name: self.name.clone(),
        }
    }

    pub fn definition_type(&self) -> Type {
        Type::StructDef {
            id: self.id,
            name: self.name.clone(),
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// An instance with every field at its zero value.
    pub fn instantiate(self: &Arc<Self>) -> StructInstance {
        let values = self.fields.iter().map(|f| f.ty.default_value()).collect();
        StructInstance::new(self.clone(), values)
    }
}

pub struct StructInstance {
    pub definition: Arc<StructDefinition>,
    fields: RwLock<Vec<Value>>,
    bucket: Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl StructInstance {
    pub fn new(definition: Arc<StructDefinition>, fields: Vec<Value>) -> Self {
        Self {
            definition,
            fields: RwLock::new(fields),
            bucket: Mutex::new(None),
        }
    }

    pub fn fields(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        sync::read(&self.fields)
    }

    pub fn fields_mut(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        sync::write(&self.fields)
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        let index = self.definition.field_index(name)?;
        self.fields().get(index).cloned()
    }

    /// Opaque slot for host state such as an open handle.
    pub fn bucket(&self) -> MutexGuard<'_, Option<Box<dyn Any + Send + Sync>>> {
        sync::lock(&self.bucket)
    }

    pub fn deep_clone(&self) -> Self {
        let values = self.fields().iter().map(Value::deep_clone).collect();
        Self::new(self.definition.clone(), values)
    }
}

impl Debug for StructInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructInstance")
            .field("definition", &self.definition.name)
            .field("fields", &*self.fields())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_instances_start_with_zero_values() {
        let definition = Arc::new(StructDefinition::new(
            "Point",
            vec![
                StructField {
                    name: "x".into(),
                    ty: Type::INT,
                    private: false,
                },
                StructField {
                    name: "label".into(),
                    ty: Type::STRING,
                    private: true,
                },
            ],
        ));
        let instance = definition.instantiate();
        assert_eq!(instance.field("x"), Some(Value::Int(0)));
        assert_eq!(instance.field("label"), Some(Value::string("")));
        assert_eq!(instance.field("missing"), None);

        *instance.bucket() = Some(Box::new(42u32));
        let stored = instance
            .bucket()
            .as_ref()
            .and_then(|b| b.downcast_ref::<u32>().copied());
        assert_eq!(stored, Some(42));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = StructDefinition::new("A", vec![]);
        let b = StructDefinition::new("A", vec![]);
        assert_ne!(a.id, b.id);
        assert!(!a.instance_type().compare(&b.instance_type()));
    }
}
