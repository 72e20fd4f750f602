use std::sync::Arc;

use crate::{
    ast::{ImplDecl, StructDecl},
    error::{ExecutionError, ExecutionErrorKind, WithSpan},
    span::Span,
    sync,
    value::{
        function::Closure,
        prototype::{Member, PrototypeError},
        structs::{StructDefinition, StructField},
        types::Type,
        Value,
    },
};

use super::{scope::Binding, Interpreter};

impl Interpreter {
    pub(crate) fn declare_struct(&mut self, decl: &StructDecl, span: &Span) -> Result<(), ExecutionError> {
        let mut fields = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            if fields.iter().any(|f: &StructField| f.name == field.name) {
                return Err(ExecutionError::new(
                    ExecutionErrorKind::AlreadyDeclared(format!("{}.{}", decl.name, field.name)),
                    field.span.clone(),
                ));
            }
            fields.push(StructField {
                name: field.name.clone(),
                ty: self.resolve_type(&field.ty, &field.span)?,
                private: field.private,
            });
        }

        let definition = Arc::new(StructDefinition::new(&decl.name, fields));
        tracing::trace!(name = %decl.name, id = definition.id, "interpreter.struct.declare");
        sync::write(&self.scope)
            .declare(&decl.name, Binding::constant(Value::StructDef(definition)))
            .at(span)
    }

    /// Fills the prototype of a struct once and locks it.
    pub(crate) fn implement(&mut self, decl: &ImplDecl, span: &Span) -> Result<(), ExecutionError> {
        let definition = match self.resolve_name(&decl.target, span)? {
            Value::StructDef(definition) => definition,
            other => {
                return Err(ExecutionError::new(
                    ExecutionErrorKind::TypeMismatch(format!(
                        "cannot implement {}, '{}' is not a struct",
                        other.type_of(),
                        decl.target
                    )),
                    span.clone(),
                ))
            }
        };
        let prototype = &definition.prototype;
        if prototype.is_implemented() {
            return Err(ExecutionError::new(
                PrototypeError::AlreadyImplemented(definition.name.to_string()),
                span.clone(),
            ));
        }

        let receiver = definition.instance_type();
        let closure = Closure(self.scope.clone());
        let mut methods = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            let name = method.name.as_deref().unwrap_or_default();
            if name == "init" && method.private {
                return Err(ExecutionError::new(
                    ExecutionErrorKind::Runtime(format!(
                        "init of {} cannot be private",
                        definition.name
                    )),
                    method.span.clone(),
                ));
            }
            let function =
                self.user_function(method, closure.clone(), Some(definition.id), Some(&receiver))?;
            if name == "init"
                && !(function.returns.compare(&Type::VOID) || function.returns.compare(&receiver))
            {
                return Err(ExecutionError::new(
                    ExecutionErrorKind::TypeMismatch(format!(
                        "init of {} must return {} or void",
                        definition.name, receiver
                    )),
                    method.span.clone(),
                ));
            }
            methods.push((name, function, method));
        }

        // Nothing touches the prototype until every method resolved.
        prototype.unlock();
        for (name, function, method) in methods {
            if let Err(err) = prototype.set(name, Value::function(function), method.private) {
                prototype.clear();
                prototype.lock();
                return Err(ExecutionError::new(err, method.span.clone()));
            }
        }
        prototype.implement().at(span)?;
        self.module.add_implemented(definition.clone());
        tracing::trace!(name = %definition.name, methods = ?prototype.names(), "interpreter.struct.implement");
        Ok(())
    }

    /// `Name(args)`: zero values, then `init` bound to the new instance.
    pub(crate) fn construct(
        &mut self,
        definition: &Arc<StructDefinition>,
        args: Vec<Value>,
        span: &Span,
    ) -> Result<Value, ExecutionError> {
        let instance = Value::StructInstance(Arc::new(definition.instantiate()));
        match definition.prototype.get("init") {
            Some(Member {
                value: Value::Function(init),
                ..
            }) => {
                let init = init.bind(instance.clone());
                self.call_function(&init, args, span)?;
            }
            _ if !args.is_empty() => {
                return Err(ExecutionError::new(
                    ExecutionErrorKind::ArgumentCount {
                        expected: 0,
                        minimum: 0,
                        got: args.len(),
                    },
                    span.clone(),
                ))
            }
            _ => {}
        }
        Ok(instance)
    }
}
