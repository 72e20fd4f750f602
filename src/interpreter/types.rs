use crate::{
    ast::TypeNode,
    error::{ExecutionError, ExecutionErrorKind},
    span::Span,
    sync,
    value::{
        types::{BaseType, Type},
        Value,
    },
};

use super::{ImportEntry, Interpreter};

impl Interpreter {
    /// Turns a written type into a runtime type. Struct names resolve
    /// through the scope chain, `module.Name` through imports.
    pub(crate) fn resolve_type(&self, node: &TypeNode, span: &Span) -> Result<Type, ExecutionError> {
        Ok(match node {
            TypeNode::Named { name, nullable } => {
                let ty = self.named_type(name, span)?;
                if *nullable {
                    Type::Nullable(Box::new(ty))
                } else {
                    ty
                }
            }
            TypeNode::List(item) => Type::list(self.resolve_type(item, span)?),
            TypeNode::Dict(key, value) => {
                let key = self.resolve_type(key, span)?;
                if !key.is_hashable() {
                    return Err(ExecutionError::new(
                        ExecutionErrorKind::UnhashableKey(key.to_string()),
                        span.clone(),
                    ));
                }
                Type::dict(key, self.resolve_type(value, span)?)
            }
            TypeNode::Function { args, returns } => {
                let args = args
                    .iter()
                    .map(|arg| self.resolve_type(arg, span))
                    .collect::<Result<Vec<_>, _>>()?;
                let returns = match returns {
                    Some(returns) => self.resolve_type(returns, span)?,
                    None => Type::VOID,
                };
                Type::function(args, returns)
            }
            TypeNode::Ref(inner) => Type::Ref(Box::new(self.resolve_type(inner, span)?)),
            TypeNode::Union(members) => Type::union(
                members
                    .iter()
                    .map(|member| self.resolve_type(member, span))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }

    fn named_type(&self, name: &str, span: &Span) -> Result<Type, ExecutionError> {
        if let Some(base) = BaseType::from_name(name) {
            return Ok(Type::Primitive(base));
        }
        match name {
            "dict" => return Ok(Type::dict(Type::ANY, Type::ANY)),
            "list" => return Ok(Type::list(Type::ANY)),
            _ => {}
        }

        let value = match name.split_once('.') {
            Some((alias, member)) => match self.module.import(alias) {
                Some(ImportEntry::Module(module)) => sync::read(&module.globals).get(member),
                Some(ImportEntry::Package(package)) => package_member(&package, member),
                None => None,
            },
            None => self.lookup(name, span).ok(),
        };

        match value {
            Some(Value::StructDef(definition)) => Ok(definition.instance_type()),
            _ => Err(ExecutionError::new(
                ExecutionErrorKind::TypeMismatch(format!("unknown type '{name}'")),
                span.clone(),
            )),
        }
    }
}

fn package_member(package: &Value, member: &str) -> Option<Value> {
    match package {
        Value::Dict(dict) => dict.get(&Value::string(member)),
        _ => None,
    }
}

/// Shared type of a literal's items; `any` when they differ or there are none.
pub(crate) fn common_type<'a>(values: impl IntoIterator<Item = &'a Value>) -> Type {
    let mut values = values.into_iter();
    let Some(first) = values.next() else {
        return Type::ANY;
    };
    let ty = first.type_of();
    if values.all(|value| value.type_of() == ty) {
        ty
    } else {
        Type::ANY
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_common_type() {
        assert_eq!(common_type(&[Value::Int(1), Value::Int(2)]), Type::INT);
        assert_eq!(common_type(&[Value::Int(1), Value::string("a")]), Type::ANY);
        assert_eq!(common_type(&Vec::<Value>::new()), Type::ANY);
    }
}
