use std::sync::Arc;

use crate::{
    ast::FunctionDecl,
    error::{ExecutionError, ExecutionErrorKind, WithSpan},
    span::Span,
    sync,
    value::{
        function::{Callable, Closure, FnArg, Function, UserFunction},
        types::Type,
        Value,
    },
};

use super::{
    scope::{Binding, Scope, ScopeKind},
    Interpreter,
};

impl Interpreter {
    pub(crate) fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        span: &Span,
    ) -> Result<Option<Value>, ExecutionError> {
        self.enter_call(span)?;
        let args = function.resolve_arguments(args).at(span)?;
        let result = match &function.body {
            Callable::Native(native) => native(self, args, span)?,
            Callable::User(user) => self.call_user(function, user, args, span)?,
        };
        function.check_return(&result).at(span)?;
        Ok(result)
    }

    fn call_user(
        &mut self,
        function: &Function,
        user: &UserFunction,
        args: Vec<Value>,
        span: &Span,
    ) -> Result<Option<Value>, ExecutionError> {
        let scope = Scope::boxed(Some(user.closure.scope()), ScopeKind::Function);
        {
            let mut scope = sync::write(&scope);
            for (arg, value) in function.args.iter().zip(args) {
                scope.force(&arg.name, Binding::variable(value, Some(arg.ty.clone())));
            }
        }

        tracing::trace!(function = function.display_name(), "interpreter.call");
        let mut frame = self.child(scope, user.module.clone(), user.private_access);
        frame
            .run_body(&user.decl.body)
            .map_err(|err| err.with_trace(span))
    }

    pub(crate) fn function_value(
        &mut self,
        decl: &FunctionDecl,
        closure: Closure,
    ) -> Result<Value, ExecutionError> {
        let function = self.user_function(decl, closure, self.private_access, None)?;
        Ok(Value::function(function))
    }

    /// Resolves argument and return types and evaluates defaults now.
    /// `receiver` is the type given to an untyped leading `self`.
    pub(crate) fn user_function(
        &mut self,
        decl: &FunctionDecl,
        closure: Closure,
        private_access: Option<u64>,
        receiver: Option<&Type>,
    ) -> Result<Function, ExecutionError> {
        let mut args = Vec::with_capacity(decl.args.len());
        for (i, arg) in decl.args.iter().enumerate() {
            let ty = match (&arg.ty, receiver) {
                (Some(node), _) => self.resolve_type(node, &arg.span)?,
                (None, Some(receiver)) if i == 0 && arg.name == "self" => receiver.clone(),
                (None, _) => Type::ANY,
            };
            let mut resolved = FnArg::new(&arg.name, ty);
            if let Some(default) = &arg.default {
                let value = self.evaluate(default)?;
                if !resolved.ty.compare(&value.type_of()) {
                    return Err(ExecutionError::new(
                        ExecutionErrorKind::TypeMismatch(format!(
                            "default of '{}' expected type {}, got {}",
                            arg.name,
                            resolved.ty,
                            value.type_of()
                        )),
                        arg.span.clone(),
                    ));
                }
                resolved = resolved.with_default(value);
            }
            args.push(resolved);
        }

        let returns = match &decl.returns {
            Some(node) => self.resolve_type(node, &decl.span)?,
            None => Type::any_or_void(),
        };

        Ok(Function {
            name: decl.name.clone(),
            args,
            returns,
            body: Callable::User(UserFunction {
                decl: Arc::new(decl.clone()),
                closure,
                module: self.module.clone(),
                private_access,
            }),
            bound: None,
            variadic: false,
        })
    }
}
