use std::sync::Arc;

use crate::{
    ast::{EventDecl, FunctionDecl, Publish, Subscribe},
    error::{ExecutionError, ExecutionErrorKind, WithSpan},
    events::{Event, Handler},
    span::Span,
    value::function::Closure,
};

use super::{ImportEntry, Interpreter};

impl Interpreter {
    /// `<interpreter id>_<name>`; `module.name` refers to an imported module's event.
    fn event_id(&self, name: &str, span: &Span) -> Result<String, ExecutionError> {
        let Some((alias, event)) = name.split_once('.') else {
            return Ok(format!("{}_{name}", self.module.id));
        };
        match self.module.import(alias) {
            Some(ImportEntry::Module(module)) => Ok(format!("{}_{event}", module.id)),
            _ => Err(ExecutionError::new(
                ExecutionErrorKind::Import(format!("'{alias}' is not an imported module")),
                span.clone(),
            )),
        }
    }

    pub(crate) fn declare_event(&mut self, decl: &EventDecl, span: &Span) -> Result<(), ExecutionError> {
        let id = self.event_id(&decl.name, span)?;
        let mut args = Vec::with_capacity(decl.args.len());
        for arg in &decl.args {
            args.push((arg.name.clone(), self.resolve_type(&arg.ty, span)?));
        }
        self.engine
            .events()
            .add_event(Event { id: id.clone(), args })
            .at(span)?;
        tracing::debug!(event = %id, "interpreter.event.declare");
        Ok(())
    }

    /// Registers the body as a handler; each delivery runs on a fresh
    /// frame of this module and logs its own failures.
    pub(crate) fn subscribe(&mut self, decl: &Subscribe, span: &Span) -> Result<(), ExecutionError> {
        let id = self.event_id(&decl.event, span)?;
        let handler_decl = FunctionDecl {
            name: Some(decl.event.clone()),
            args: decl.args.clone(),
            returns: None,
            body: decl.body.clone(),
            private: false,
            span: span.clone(),
        };
        let function = Arc::new(self.user_function(
            &handler_decl,
            Closure(self.scope.clone()),
            self.private_access,
            None,
        )?);

        let engine = self.engine.clone();
        let module = self.module.clone();
        let at = span.clone();
        let topic = id.clone();
        let handler: Handler = Arc::new(move |data| {
            if module.is_detached() {
                return;
            }
            let mut frame = super::Interpreter::new(engine.clone(), module.clone());
            if let Err(err) = frame.call_function(&function, data, &at) {
                tracing::error!(event = %topic, error = %err, span = %err.span, "interpreter.event.handler");
            }
        });

        let subscription = self.engine.events().subscribe(&id, handler).at(span)?;
        self.module.add_subscription(subscription);
        tracing::debug!(event = %id, "interpreter.event.subscribe");
        Ok(())
    }

    pub(crate) fn publish(&mut self, decl: &Publish, span: &Span) -> Result<(), ExecutionError> {
        let id = self.event_id(&decl.event, span)?;
        let args = self.arguments(&decl.args)?;
        self.engine.events().publish(&id, args).at(span)?;
        tracing::trace!(event = %id, "interpreter.event.publish");
        Ok(())
    }
}
