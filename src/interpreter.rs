mod builtins;
mod callable;
mod element;
mod events;
mod expression;
mod imports;
mod prototypes;
pub mod scope;
mod structs;
mod types;

use std::{
    fmt::Debug,
    mem,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
    thread::{self, JoinHandle},
};

use rustc_hash::FxHashMap;

use crate::{
    ast::{
        Accessor, ElseBranch, Expression, ForStatement, IfStatement, Path, Program, Signal, Statement,
        StatementKind, VariableDecl,
    },
    cancel::CancellationToken,
    engine::Engine,
    error::{ExecutionError, ExecutionErrorKind, WithSpan},
    events::Subscription,
    span::Span,
    sync,
    value::{function::Closure, structs::StructDefinition, types::Type, Value},
};

use self::scope::{Binding, Scope, ScopeKind};

pub(crate) use self::{builtins::builtin, element::context_definition};

/// Deepest user call chain before execution is aborted.
const MAX_CALL_DEPTH: usize = 256;

/// How a statement finished.
#[derive(Debug, Clone)]
pub enum Flow {
    Normal,
    /// `None` is a bare `return`.
    Return(Option<Value>),
    Signal(Signal, Span),
}

#[derive(Debug, Clone)]
pub enum ImportEntry {
    Module(Arc<Module>),
    Package(Value),
}

/// One loaded file: its globals, imports and everything it left running.
pub struct Module {
    pub id: u64,
    pub file: Arc<str>,
    pub dir: PathBuf,
    pub path: Option<PathBuf>,
    pub globals: Arc<RwLock<Scope>>,
    pub imports: RwLock<FxHashMap<String, ImportEntry>>,
    pub cancel: CancellationToken,
    subscriptions: Mutex<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    dependents: Mutex<Vec<Arc<Module>>>,
    /// Structs implemented here; their methods close over this module's scopes.
    implemented: Mutex<Vec<Arc<StructDefinition>>>,
    detached: AtomicBool,
}

impl Module {
    pub(crate) fn new(
        id: u64,
        file: Arc<str>,
        dir: PathBuf,
        path: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            file,
            dir,
            path,
            globals: Scope::boxed(None, ScopeKind::Global),
            imports: RwLock::new(FxHashMap::default()),
            cancel,
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            dependents: Mutex::new(Vec::new()),
            implemented: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub(crate) fn add_subscription(&self, subscription: Subscription) {
        sync::lock(&self.subscriptions).push(subscription);
    }

    pub(crate) fn add_task(&self, task: JoinHandle<()>) {
        sync::lock(&self.tasks).push(task);
    }

    /// Modules that go away together with this one.
    pub(crate) fn add_dependent(&self, module: Arc<Module>) {
        if module.id != self.id {
            sync::lock(&self.dependents).push(module);
        }
    }

    pub(crate) fn add_implemented(&self, definition: Arc<StructDefinition>) {
        sync::lock(&self.implemented).push(definition);
    }

    pub(crate) fn import(&self, alias: &str) -> Option<ImportEntry> {
        sync::read(&self.imports).get(alias).cloned()
    }

    pub fn has_tasks(&self) -> bool {
        !sync::lock(&self.tasks).is_empty()
    }

    /// Waits for every spawned task, including ones spawned while waiting.
    pub fn join_tasks(&self) {
        loop {
            let tasks = mem::take(&mut *sync::lock(&self.tasks));
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if task.join().is_err() {
                    tracing::error!(id = self.id, "interpreter.spawn.panicked");
                }
            }
        }
    }

    /// Cancels running work, drops subscriptions and releases globals.
    /// Cascades to the modules this one imported.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        for subscription in mem::take(&mut *sync::lock(&self.subscriptions)) {
            subscription.unsubscribe();
        }
        for dependent in mem::take(&mut *sync::lock(&self.dependents)) {
            dependent.detach();
        }
        for definition in mem::take(&mut *sync::lock(&self.implemented)) {
            definition.prototype.clear();
        }
        sync::write(&self.globals).clear();
        sync::write(&self.imports).clear();
        tracing::debug!(id = self.id, file = %self.file, "interpreter.detach");
    }
}

impl Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

pub struct Interpreter {
    engine: Arc<Engine>,
    module: Arc<Module>,
    scope: Arc<RwLock<Scope>>,
    deferred: Vec<Expression>,
    /// Struct whose private members this frame may touch.
    private_access: Option<u64>,
    depth: usize,
}

impl Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("module", &self.module)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    pub fn new(engine: Arc<Engine>, module: Arc<Module>) -> Self {
        let scope = module.globals.clone();
        Self {
            engine,
            module,
            scope,
            deferred: Vec::new(),
            private_access: None,
            depth: 0,
        }
    }

    /// A frame for a call, handler or task.
    pub(crate) fn child(
        &self,
        scope: Arc<RwLock<Scope>>,
        module: Arc<Module>,
        private_access: Option<u64>,
    ) -> Self {
        Self {
            engine: self.engine.clone(),
            module,
            scope,
            deferred: Vec::new(),
            private_access,
            depth: self.depth + 1,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn scope(&self) -> &Arc<RwLock<Scope>> {
        &self.scope
    }

    /// Binds a host value as an immutable global.
    pub fn bind_host_object(&self, name: &str, value: Value) {
        sync::write(&self.module.globals).force(name, Binding::constant(value));
    }

    pub(crate) fn bind_module_globals(&self, entry: bool) {
        let module = &self.module;
        let mut globals = sync::write(&module.globals);
        globals.force("__id__", Binding::constant(Value::Int(module.id as i64)));
        globals.force("__entry__", Binding::constant(Value::Bool(entry)));
        globals.force("__file__", Binding::constant(Value::string(&*module.file)));
        globals.force(
            "__dir__",
            Binding::constant(Value::string(module.dir.display().to_string())),
        );
    }

    /// Runs a whole file. The value of a top-level `return` is the result.
    pub fn run(&mut self, program: &Program) -> Result<Option<Value>, ExecutionError> {
        tracing::debug!(id = self.module.id, file = %self.module.file, "interpreter.run");
        self.run_body(&program.0)
    }

    /// Executes a function-like body and its deferred expressions.
    pub(crate) fn run_body(
        &mut self,
        statements: &[Statement],
    ) -> Result<Option<Value>, ExecutionError> {
        let result = self.execute_statements(statements);
        self.run_deferred();
        match result? {
            Flow::Normal => Ok(None),
            Flow::Return(value) => Ok(value),
            Flow::Signal(signal, span) => Err(ExecutionError::new(
                ExecutionErrorKind::SignalOutsideLoop(signal_name(signal).to_string()),
                span,
            )),
        }
    }

    fn run_deferred(&mut self) {
        while let Some(expression) = self.deferred.pop() {
            if let Err(err) = self.evaluate(&expression) {
                tracing::error!(id = self.module.id, error = %err, span = %err.span, "interpreter.defer.error");
            }
        }
    }

    fn execute_statements(&mut self, statements: &[Statement]) -> Result<Flow, ExecutionError> {
        for statement in statements {
            match self.execute(statement)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Runs `statements` with `scope` as the current scope.
    pub(crate) fn execute_in_scope<T>(
        &mut self,
        scope: Arc<RwLock<Scope>>,
        run: impl FnOnce(&mut Self) -> Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        let previous = mem::replace(&mut self.scope, scope);
        let result = run(self);
        self.scope = previous;
        result
    }

    fn execute_block(
        &mut self,
        statements: &[Statement],
        kind: &'static str,
        span: &Span,
    ) -> Result<Flow, ExecutionError> {
        let scope = Scope::boxed(Some(self.scope.clone()), ScopeKind::Block(kind));
        self.execute_in_scope(scope, |this| this.execute_statements(statements))
            .map_err(|err| err.with_trace(span))
    }

    pub(crate) fn check_cancelled(&self, span: &Span) -> Result<(), ExecutionError> {
        if self.module.cancel.is_cancelled() {
            return Err(ExecutionError::new(ExecutionErrorKind::Cancelled, span.clone()));
        }
        Ok(())
    }

    pub(crate) fn enter_call(&self, span: &Span) -> Result<(), ExecutionError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecutionError::new(
                ExecutionErrorKind::Runtime(format!(
                    "maximum call depth of {MAX_CALL_DEPTH} exceeded"
                )),
                span.clone(),
            ));
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Statement) -> Result<Flow, ExecutionError> {
        let span = &statement.span;
        self.check_cancelled(span)?;

        match &statement.kind {
            StatementKind::Import(import) => self.import(import, span)?,
            StatementKind::Include(path) => {
                self.include(path, span)?;
            }
            StatementKind::Function(decl) => {
                let function = self.function_value(decl, Closure(self.scope.clone()))?;
                if let Some(name) = &decl.name {
                    sync::write(&self.scope)
                        .declare(name, Binding::constant(function))
                        .at(span)?;
                }
            }
            StatementKind::Struct(decl) => self.declare_struct(decl, span)?,
            StatementKind::Impl(decl) => self.implement(decl, span)?,
            StatementKind::Event(decl) => self.declare_event(decl, span)?,
            StatementKind::Subscribe(decl) => self.subscribe(decl, span)?,
            StatementKind::Publish(decl) => self.publish(decl, span)?,
            StatementKind::VariableDecl(decl) => self.declare_variable(decl, span)?,
            StatementKind::Assign { target, value } => {
                let value = self.evaluate(value)?;
                self.assign(target, value, span)?;
            }
            StatementKind::Increment(path) => self.step(path, 1, span)?,
            StatementKind::Decrement(path) => self.step(path, -1, span)?,
            StatementKind::Expression(expression) => {
                self.evaluate(expression)?;
            }
            StatementKind::Return(expression) => {
                let value = match expression {
                    Some(expression) => Some(self.evaluate(expression)?),
                    None => None,
                };
                return Ok(Flow::Return(value));
            }
            StatementKind::If(statement) => return self.if_statement(statement, span),
            StatementKind::While { condition, body } => {
                return self.while_statement(condition, body, span)
            }
            StatementKind::For(statement) => return self.for_statement(statement, span),
            StatementKind::Signal(signal) => return Ok(Flow::Signal(*signal, span.clone())),
            StatementKind::Try { body, name } => return self.try_statement(body, name, span),
            StatementKind::Defer(expression) => self.deferred.push(expression.clone()),
            StatementKind::Spawn(expression) => self.spawn(expression, span)?,
        }

        Ok(Flow::Normal)
    }

    fn declare_variable(&mut self, decl: &VariableDecl, span: &Span) -> Result<(), ExecutionError> {
        let declared = match &decl.ty {
            Some(node) => Some(self.resolve_type(node, span)?),
            None => None,
        };
        let value = match (&decl.value, &declared) {
            (Some(expression), _) => self.evaluate(expression)?,
            (None, Some(ty)) => ty.default_value(),
            (None, None) => Value::Nil,
        };

        let ty = match declared {
            Some(ty) => {
                let actual = value.type_of();
                if !ty.compare(&actual) {
                    return Err(ExecutionError::new(
                        ExecutionErrorKind::TypeMismatch(format!(
                            "cannot assign {actual} to '{}' of type {ty}",
                            decl.name
                        )),
                        span.clone(),
                    ));
                }
                Some(ty)
            }
            None if value.is_nil() => None,
            None => Some(value.type_of()),
        };

        let binding = if decl.constant {
            Binding::constant(value)
        } else {
            Binding::variable(value, ty)
        };
        sync::write(&self.scope).declare(&decl.name, binding).at(span)
    }

    /// `name = v`, `a.b = v` or `a[i] = v`.
    fn assign(&mut self, target: &Path, value: Value, span: &Span) -> Result<(), ExecutionError> {
        let Some((last, init)) = target.accessors.split_last() else {
            return sync::write(&self.scope).assign(&target.root, value).at(span);
        };

        let mut container = self.lookup(&target.root, span)?;
        for accessor in init {
            container = self.access(container, accessor)?;
        }
        match last {
            Accessor::Field(name, at) => self.set_member(&container, name, value, at),
            Accessor::Index(index, at) => {
                let key = self.evaluate(index)?;
                self.set_index(&container, key, value, at)
            }
            Accessor::Call(_, at) => Err(ExecutionError::new(
                ExecutionErrorKind::Runtime("cannot assign to a call".into()),
                at.clone(),
            )),
        }
    }

    /// `x++` and `x--`.
    fn step(&mut self, target: &Path, delta: i64, span: &Span) -> Result<(), ExecutionError> {
        let mut current = self.lookup(&target.root, span)?;
        for accessor in &target.accessors {
            current = self.access(current, accessor)?;
        }
        let next = match current {
            Value::Int(n) => n
                .checked_add(delta)
                .map(Value::Int)
                .ok_or_else(|| ExecutionErrorKind::Value("integer overflow".into())),
            Value::Float(f) => Ok(Value::Float(f + delta as f64)),
            Value::Byte(b) => b
                .checked_add_signed(delta as i8)
                .map(Value::Byte)
                .ok_or_else(|| ExecutionErrorKind::Value("byte overflow".into())),
            other => Err(ExecutionErrorKind::InvalidOperand(other.type_of().to_string())),
        }
        .at(span)?;
        self.assign(target, next, span)
    }

    fn condition(&mut self, condition: &Expression) -> Result<bool, ExecutionError> {
        match self.evaluate(condition)? {
            Value::Bool(b) => Ok(b),
            other => Err(ExecutionError::new(
                ExecutionErrorKind::ConditionNotBool(other.type_of().to_string()),
                condition.span.clone(),
            )),
        }
    }

    fn if_statement(&mut self, statement: &IfStatement, span: &Span) -> Result<Flow, ExecutionError> {
        if self.condition(&statement.condition)? {
            return self.execute_block(&statement.body, "if", span);
        }
        match &statement.else_branch {
            Some(ElseBranch::If(nested)) => self.if_statement(nested, span),
            Some(ElseBranch::Block(body)) => self.execute_block(body, "else", span),
            None => Ok(Flow::Normal),
        }
    }

    fn while_statement(
        &mut self,
        condition: &Expression,
        body: &[Statement],
        span: &Span,
    ) -> Result<Flow, ExecutionError> {
        while self.condition(condition)? {
            self.check_cancelled(span)?;
            match self.execute_block(body, "while", span)? {
                Flow::Signal(Signal::Break, _) => break,
                Flow::Normal | Flow::Signal(Signal::Continue, _) => {}
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn for_statement(&mut self, statement: &ForStatement, span: &Span) -> Result<Flow, ExecutionError> {
        let iterable = self.evaluate(&statement.iterable)?;
        let pairs = iterable.iterate().at(&statement.iterable.span)?;
        let ForStatement { value: names, body, .. } = statement;

        for (key, value) in pairs {
            self.check_cancelled(span)?;
            let scope = Scope::boxed(Some(self.scope.clone()), ScopeKind::Block("for"));
            {
                let mut scope = sync::write(&scope);
                match &names.iterator {
                    Some(key_name) => {
                        scope.force(key_name, Binding::variable(key, None));
                        scope.force(&names.value, Binding::variable(value, None));
                    }
                    None => scope.force(&names.value, Binding::variable(value, None)),
                }
            }
            let flow = self
                .execute_in_scope(scope, |this| this.execute_statements(body))
                .map_err(|err| err.with_trace(span))?;
            match flow {
                Flow::Signal(Signal::Break, _) => break,
                Flow::Normal | Flow::Signal(Signal::Continue, _) => {}
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Binds `name` to nil on success or to an error dict when the body
    /// failed. Fatal errors pass through.
    fn try_statement(
        &mut self,
        body: &[Statement],
        name: &str,
        span: &Span,
    ) -> Result<Flow, ExecutionError> {
        let (flow, caught) = match self.execute_block(body, "try", span) {
            Ok(flow) => (flow, Value::Nil),
            Err(err) if err.is_catchable() => {
                tracing::debug!(id = self.module.id, error = %err, "interpreter.try.caught");
                (Flow::Normal, error_value(&err).at(span)?)
            }
            Err(err) => return Err(err),
        };
        sync::write(&self.scope).force(name, Binding::variable(caught, None));
        Ok(flow)
    }

    /// Evaluates `expression` on its own thread. Failures are logged.
    fn spawn(&mut self, expression: &Expression, span: &Span) -> Result<(), ExecutionError> {
        let scope = Scope::boxed(Some(self.scope.clone()), ScopeKind::Block("nubo_concurrent"));
        sync::write(&scope).force("__concurrent__", Binding::constant(Value::Bool(true)));

        let mut task = self.child(scope, self.module.clone(), self.private_access);
        let expression = expression.clone();
        let id = self.module.id;
        let handle = thread::Builder::new()
            .name(format!("nubo-task-{id}"))
            .stack_size(16 * 1024 * 1024)
            .spawn(move || {
                let result = task.evaluate(&expression);
                task.run_deferred();
                if let Err(err) = result {
                    tracing::error!(id, error = %err, span = %err.span, "interpreter.spawn.error");
                }
            })
            .map_err(|err| ExecutionErrorKind::Runtime(format!("failed to spawn task: {err}")))
            .at(span)?;
        self.module.add_task(handle);
        Ok(())
    }

    /// Scope chain, then builtins.
    pub(crate) fn lookup(&self, name: &str, span: &Span) -> Result<Value, ExecutionError> {
        if let Some(value) = sync::read(&self.scope).get(name) {
            return Ok(value);
        }
        builtin(&self.engine, name).ok_or_else(|| {
            ExecutionError::new(ExecutionErrorKind::UndefinedVariable(name.into()), span.clone())
        })
    }

    pub(crate) fn write_output(&self, text: &str) -> Result<(), ExecutionErrorKind> {
        self.engine
            .write_output(text)
            .map_err(|err| ExecutionErrorKind::Runtime(format!("failed to write output: {err}")))
    }
}

fn signal_name(signal: Signal) -> &'static str {
    match signal {
        Signal::Break => "break",
        Signal::Continue => "continue",
    }
}

fn span_value(span: &Span) -> Result<Value, ExecutionErrorKind> {
    Value::dict(
        vec![
            (Value::string("file"), Value::string(&*span.file)),
            (Value::string("line"), Value::Int(span.line as i64)),
            (Value::string("column"), Value::Int(span.column as i64)),
            (Value::string("columnEnd"), Value::Int(span.column_end as i64)),
        ],
        Type::STRING,
        Type::ANY,
    )
}

/// `{base, message, metaData, stackTrace}` as seen by a `try` binding.
fn error_value(err: &ExecutionError) -> Result<Value, ExecutionErrorKind> {
    let trace = err
        .trace
        .iter()
        .rev()
        .map(|span| Value::string(span.to_string()))
        .collect();
    Value::dict(
        vec![
            (Value::string("base"), Value::string(err.kind.base())),
            (Value::string("message"), Value::string(err.kind.to_string())),
            (Value::string("metaData"), span_value(&err.span)?),
            (Value::string("stackTrace"), Value::list(trace, Type::STRING)),
        ],
        Type::STRING,
        Type::ANY,
    )
}
