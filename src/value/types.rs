use std::{fmt::Display, sync::Arc};

use super::{dict::Dict, List, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Int,
    Float,
    Bool,
    String,
    Char,
    Byte,
    Nil,
    Any,
    Void,
    Html,
}

impl BaseType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "int" => BaseType::Int,
            "float" => BaseType::Float,
            "bool" => BaseType::Bool,
            "string" => BaseType::String,
            "char" => BaseType::Char,
            "byte" => BaseType::Byte,
            "nil" => BaseType::Nil,
            "any" => BaseType::Any,
            "void" => BaseType::Void,
            "html" => BaseType::Html,
            _ => return None,
        })
    }
}

/// Structural runtime type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(BaseType),
    List(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    Function { args: Vec<Type>, returns: Box<Type> },
    Union(Vec<Type>),
    Nullable(Box<Type>),
    Struct { id: u64, name: Arc<str> },
    StructDef { id: u64, name: Arc<str> },
    Ref(Box<Type>),
}

impl Type {
    pub const INT: Type = Type::Primitive(BaseType::Int);
    pub const FLOAT: Type = Type::Primitive(BaseType::Float);
    pub const BOOL: Type = Type::Primitive(BaseType::Bool);
    pub const STRING: Type = Type::Primitive(BaseType::String);
    pub const CHAR: Type = Type::Primitive(BaseType::Char);
    pub const BYTE: Type = Type::Primitive(BaseType::Byte);
    pub const NIL: Type = Type::Primitive(BaseType::Nil);
    pub const ANY: Type = Type::Primitive(BaseType::Any);
    pub const VOID: Type = Type::Primitive(BaseType::Void);
    pub const HTML: Type = Type::Primitive(BaseType::Html);

    pub fn list(item: Type) -> Self {
        Type::List(Box::new(item))
    }

    pub fn dict(key: Type, value: Type) -> Self {
        Type::Dict(Box::new(key), Box::new(value))
    }

    pub fn function(args: Vec<Type>, returns: Type) -> Self {
        Type::Function {
            args,
            returns: Box::new(returns),
        }
    }

    /// Return type of functions declared without one.
    pub fn any_or_void() -> Self {
        Type::Union(vec![Type::ANY, Type::VOID])
    }

    /// Builds a union, collapsing single members.
    pub fn union(mut types: Vec<Type>) -> Self {
        if types.len() == 1 {
            if let Some(ty) = types.pop() {
                return ty;
            }
        }
        Type::Union(types)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Primitive(BaseType::Any))
    }

    /// Whether a value of type `actual` may be stored where `self` is expected.
    pub fn compare(&self, actual: &Type) -> bool {
        use BaseType::*;

        if self.is_any() || actual.is_any() {
            return true;
        }

        if let Type::Union(expected) = self {
            if let Type::Union(members) = actual {
                return members
                    .iter()
                    .all(|member| expected.iter().any(|e| e.compare(member)));
            }
            return expected.iter().any(|e| e.compare(actual));
        }

        if let Type::Union(members) = actual {
            return members.iter().all(|member| self.compare(member));
        }

        if let Type::Nullable(inner) = self {
            return *actual == Type::NIL || inner.compare(actual);
        }

        if *actual == Type::NIL {
            return matches!(
                self,
                Type::Primitive(Nil)
                    | Type::List(_)
                    | Type::Dict(..)
                    | Type::Struct { .. }
                    | Type::Function { .. }
            );
        }

        match (self, actual) {
            (Type::Primitive(String | Html), Type::Primitive(String | Html)) => true,
            (Type::Primitive(a), Type::Primitive(b)) => a == b,
            (Type::List(a), Type::List(b)) => a.compare(b),
            (Type::Dict(ak, av), Type::Dict(bk, bv)) => ak.compare(bk) && av.compare(bv),
            (
                Type::Function {
                    args: a_args,
                    returns: a_returns,
                },
                Type::Function {
                    args: b_args,
                    returns: b_returns,
                },
            ) => {
                a_args.len() == b_args.len()
                    && a_args
                        .iter()
                        .zip(b_args)
                        .all(|(a, b)| a.compare(b) || b.compare(a))
                    && (a_returns.compare(b_returns) || b_returns.compare(a_returns))
            }
            (Type::Struct { id: a, .. }, Type::Struct { id: b, .. }) => a == b,
            (Type::StructDef { id: a, .. }, Type::StructDef { id: b, .. }) => a == b,
            (Type::Ref(a), Type::Ref(b)) => a.compare(b),
            _ => false,
        }
    }

    /// Dict keys may only be built from these.
    pub fn is_hashable(&self) -> bool {
        match self {
            Type::Primitive(base) => matches!(
                base,
                BaseType::Int
                    | BaseType::Float
                    | BaseType::Bool
                    | BaseType::String
                    | BaseType::Char
                    | BaseType::Byte
                    | BaseType::Any
            ),
            Type::Union(types) => types.iter().all(Type::is_hashable),
            _ => false,
        }
    }

    /// Zero value used by `let x: T` without an initializer.
    pub fn default_value(&self) -> Value {
        match self {
            Type::Primitive(BaseType::Int) => Value::Int(0),
            Type::Primitive(BaseType::Float) => Value::Float(0.0),
            Type::Primitive(BaseType::Bool) => Value::Bool(false),
            Type::Primitive(BaseType::String | BaseType::Html) => Value::string(""),
            Type::Primitive(BaseType::Char) => Value::Char('\0'),
            Type::Primitive(BaseType::Byte) => Value::Byte(0),
            Type::List(item) => Value::List(Arc::new(List::new(Vec::new(), (**item).clone()))),
            Type::Dict(key, value) => {
                Value::Dict(Arc::new(Dict::empty((**key).clone(), (**value).clone())))
            }
            _ => Value::Nil,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Primitive(base) => {
                let name = match base {
                    BaseType::Int => "int",
                    BaseType::Float => "float",
                    BaseType::Bool => "bool",
                    BaseType::String => "string",
                    BaseType::Char => "char",
                    BaseType::Byte => "byte",
                    BaseType::Nil => "nil",
                    BaseType::Any => "any",
                    BaseType::Void => "void",
                    BaseType::Html => "html",
                };
                write!(f, "{name}")
            }
            Type::List(item) => write!(f, "[]{item}"),
            Type::Dict(key, value) => write!(f, "dict[{key}, {value}]"),
            Type::Function { args, returns } => {
                write!(f, "fn(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ") -> {returns}")
            }
            Type::Union(types) => {
                for (i, ty) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{ty}")?;
                }
                Ok(())
            }
            Type::Nullable(inner) => write!(f, "{inner}?"),
            Type::Struct { name, .. } => write!(f, "{name}"),
            Type::StructDef { name, .. } => write!(f, "struct {name}"),
            Type::Ref(inner) => write!(f, "ref {inner}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_any_matches_everything() {
        assert!(Type::ANY.compare(&Type::list(Type::INT)));
        assert!(Type::list(Type::INT).compare(&Type::list(Type::ANY)));
    }

    #[test]
    fn test_nil_matches_reference_like_types() {
        assert!(Type::list(Type::STRING).compare(&Type::NIL));
        assert!(Type::Nullable(Box::new(Type::INT)).compare(&Type::NIL));
        assert!(!Type::INT.compare(&Type::NIL));
        assert!(!Type::VOID.compare(&Type::NIL));
    }

    #[test]
    fn test_unions() {
        let number = Type::union(vec![Type::INT, Type::FLOAT]);
        assert!(number.compare(&Type::FLOAT));
        assert!(!number.compare(&Type::STRING));
        assert!(!Type::INT.compare(&number));
        assert!(Type::any_or_void().compare(&Type::VOID));
    }

    #[test]
    fn test_html_and_string_are_interchangeable() {
        assert!(Type::HTML.compare(&Type::STRING));
        assert!(Type::STRING.compare(&Type::HTML));
    }

    #[test]
    fn test_structs_compare_by_id() {
        let a = Type::Struct {
            id: 1,
            name: Arc::from("User"),
        };
        let b = Type::Struct {
            id: 2,
            name: Arc::from("User"),
        };
        assert!(a.compare(&a.clone()));
        assert!(!a.compare(&b));
    }

    #[test]
    fn test_display() {
        let ty = Type::function(
            vec![Type::dict(Type::STRING, Type::list(Type::INT))],
            Type::Nullable(Box::new(Type::BOOL)),
        );
        assert_eq!(ty.to_string(), "fn(dict[string, []int]) -> bool?");
    }
}
