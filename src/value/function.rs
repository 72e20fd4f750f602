use std::{
    fmt::Debug,
    sync::{Arc, RwLock},
};

use super::{types::Type, Value};
use crate::{
    ast::FunctionDecl,
    error::{ExecutionError, ExecutionErrorKind},
    interpreter::{scope::Scope, Interpreter, Module},
    span::Span,
};

pub type NativeFn = dyn Fn(&mut Interpreter, Vec<Value>, &Span) -> Result<Option<Value>, ExecutionError>
    + Send
    + Sync;

#[derive(Debug, Clone)]
pub struct FnArg {
    pub name: String,
    pub ty: Type,
    pub default: Option<Value>,
}

impl FnArg {
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Captured scope of a user function. Struct methods close over it too; the
/// resulting definition/scope cycle is cut when the module detaches.
#[derive(Debug, Clone)]
pub struct Closure(pub Arc<RwLock<Scope>>);

impl Closure {
    pub fn scope(&self) -> Arc<RwLock<Scope>> {
        self.0.clone()
    }
}

#[derive(Debug, Clone)]
pub struct UserFunction {
    pub decl: Arc<FunctionDecl>,
    pub closure: Closure,
    pub module: Arc<Module>,
    /// Struct whose private members the body may touch.
    pub private_access: Option<u64>,
}

#[derive(Clone)]
pub enum Callable {
    User(UserFunction),
    Native(Arc<NativeFn>),
}

impl Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::User(user) => f
                .debug_tuple("User")
                .field(&user.decl.name)
                .field(&user.decl.span)
                .finish(),
            Callable::Native(_) => write!(f, "Native"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<String>,
    pub args: Vec<FnArg>,
    pub returns: Type,
    pub body: Callable,
    /// Receiver prepended to the arguments of a bound method.
    pub bound: Option<Value>,
    /// Skips argument checks; the native body validates on its own.
    pub variadic: bool,
}

impl Function {
    pub fn native(
        name: &str,
        args: Vec<FnArg>,
        returns: Type,
        body: impl Fn(&mut Interpreter, Vec<Value>, &Span) -> Result<Option<Value>, ExecutionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: Some(name.to_string()),
            args,
            returns,
            body: Callable::Native(Arc::new(body)),
            bound: None,
            variadic: false,
        }
    }

    pub fn variadic(
        name: &str,
        returns: Type,
        body: impl Fn(&mut Interpreter, Vec<Value>, &Span) -> Result<Option<Value>, ExecutionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            variadic: true,
            ..Self::native(name, vec![], returns, body)
        }
    }

    pub fn type_of(&self) -> Type {
        let args = self.args.iter().skip(self.bound.iter().count());
        Type::function(args.map(|arg| arg.ty.clone()).collect(), self.returns.clone())
    }

    pub fn bind(&self, receiver: Value) -> Self {
        Self {
            bound: Some(receiver),
            ..self.clone()
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Checks arity and argument types, then fills missing optional slots
    /// from cloned defaults.
    pub fn resolve_arguments(&self, provided: Vec<Value>) -> Result<Vec<Value>, ExecutionErrorKind> {
        let provided: Vec<Value> = self.bound.iter().cloned().chain(provided).collect();
        if self.variadic {
            return Ok(provided);
        }

        let minimum = self.args.iter().filter(|arg| arg.default.is_none()).count();
        let expected = self.args.len();
        let offset = self.bound.iter().count();
        if provided.len() < minimum || provided.len() > expected {
            return Err(ExecutionErrorKind::ArgumentCount {
                expected: expected - offset,
                minimum: minimum.saturating_sub(offset),
                got: provided.len() - offset,
            });
        }

        let mut resolved = Vec::with_capacity(expected);
        let mut provided = provided.into_iter();
        for (i, arg) in self.args.iter().enumerate() {
            match provided.next() {
                Some(value) => {
                    let actual = value.type_of();
                    if !arg.ty.compare(&actual) {
                        return Err(ExecutionErrorKind::TypeMismatch(format!(
                            "argument {} ({}) expected type {}, got {}",
                            (i + 1).saturating_sub(offset),
                            arg.name,
                            arg.ty,
                            actual
                        )));
                    }
                    resolved.push(value);
                }
                None => match &arg.default {
                    Some(default) => resolved.push(default.deep_clone()),
                    None => {
                        return Err(ExecutionErrorKind::TypeMismatch(format!(
                            "missing required argument {} ({})",
                            i + 1,
                            arg.name
                        )))
                    }
                },
            }
        }
        Ok(resolved)
    }

    /// A void return needs an absent value; anything else must match `returns`.
    pub fn check_return(&self, value: &Option<Value>) -> Result<(), ExecutionErrorKind> {
        let actual = match value {
            None => Type::VOID,
            Some(value) => value.type_of(),
        };
        if self.returns.compare(&actual) {
            return Ok(());
        }
        Err(ExecutionErrorKind::TypeMismatch(format!(
            "expected return type {}, got {}",
            self.returns, actual
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn add() -> Function {
        Function::native(
            "add",
            vec![
                FnArg::new("a", Type::INT),
                FnArg::new("b", Type::INT).with_default(Value::Int(1)),
            ],
            Type::INT,
            |_, args, _| Ok(args.into_iter().next()),
        )
    }

    #[test]
    fn test_defaults_fill_missing_slots() {
        let resolved = add().resolve_arguments(vec![Value::Int(4)]).unwrap();
        assert_eq!(resolved, vec![Value::Int(4), Value::Int(1)]);
    }

    #[test]
    fn test_argument_errors() {
        let err = add().resolve_arguments(vec![]).unwrap_err();
        assert_eq!(err.to_string(), "expected 2 (minimum 1) arguments, got 0");

        let err = add()
            .resolve_arguments(vec![Value::Int(1), Value::string("x")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "argument 2 (b) expected type int, got string"
        );
    }

    #[test]
    fn test_void_return() {
        let mut f = add();
        f.returns = Type::VOID;
        assert!(f.check_return(&None).is_ok());
        let err = f.check_return(&Some(Value::Int(1))).unwrap_err();
        assert_eq!(err.to_string(), "expected return type void, got int");
    }

    #[test]
    fn test_bound_receiver_is_prepended() {
        let f = add().bind(Value::Int(9));
        assert_eq!(f.type_of().to_string(), "fn(int) -> int");
        let resolved = f.resolve_arguments(vec![]).unwrap();
        assert_eq!(resolved, vec![Value::Int(9), Value::Int(1)]);
    }
}
