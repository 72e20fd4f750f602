use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock, RwLock,
    },
    time::Duration,
};

use rustc_hash::FxHashMap;

use crate::{
    ast::Program,
    cancel::CancellationToken,
    config::Config,
    error::Error,
    events::EventProvider,
    interpreter::{context_definition, Interpreter, Module},
    parser,
    prepared::{self, PreparedCache},
    sync, tokenizer,
    value::{structs::StructDefinition, Value},
};

/// How long one settle round waits for event handlers before checking
/// for new tasks again.
const SETTLE_POLL: Duration = Duration::from_millis(50);

/// Shared state of every interpreter started from one host: config,
/// output sink, event bus, loaded modules, host packages and the
/// prepared-file cache.
pub struct Engine {
    config: Config,
    working_dir: PathBuf,
    output: Mutex<Box<dyn Write + Send>>,
    events: OnceLock<EventProvider>,
    modules: RwLock<FxHashMap<PathBuf, Arc<Module>>>,
    packages: RwLock<FxHashMap<String, Value>>,
    prepared: PreparedCache,
    next_id: AtomicU64,
    cancel: CancellationToken,
    context: Arc<StructDefinition>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("working_dir", &self.working_dir)
            .field("modules", &sync::read(&self.modules).len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine rooted at the process working directory, printing to stdout.
    pub fn new(config: Config) -> Arc<Self> {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_options(config, working_dir, std::io::stdout())
    }

    pub fn with_options(
        config: Config,
        working_dir: impl Into<PathBuf>,
        output: impl Write + Send + 'static,
    ) -> Arc<Self> {
        let working_dir = working_dir.into();
        let working_dir = working_dir.canonicalize().unwrap_or(working_dir);
        let events = OnceLock::new();
        if config.runtime.events.enabled {
            let _ = events.set(EventProvider::new(config.runtime.events.options()));
        }
        tracing::debug!(dir = %working_dir.display(), "engine.new");
        Arc::new(Self {
            prepared: PreparedCache::new(&working_dir),
            config,
            working_dir,
            output: Mutex::new(Box::new(output)),
            events,
            modules: RwLock::new(FxHashMap::default()),
            packages: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            context: Arc::new(context_definition()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The event bus, started on first use unless the config enabled it
    /// up front.
    pub fn events(&self) -> &EventProvider {
        self.events
            .get_or_init(|| EventProvider::new(self.config.runtime.events.options()))
    }

    pub fn prepared(&self) -> &PreparedCache {
        &self.prepared
    }

    /// Makes `value` importable as `name`, e.g. `@server/request`.
    pub fn provide_package(&self, name: &str, value: Value) {
        sync::write(&self.packages).insert(name.to_string(), value);
    }

    pub fn package(&self, name: &str) -> Option<Value> {
        sync::read(&self.packages).get(name).cloned()
    }

    pub fn context_definition(&self) -> Arc<StructDefinition> {
        self.context.clone()
    }

    pub fn write_output(&self, text: &str) -> std::io::Result<()> {
        let mut output = sync::lock(&self.output);
        output.write_all(text.as_bytes())?;
        output.flush()
    }

    /// Lexes and parses under the configured deadline.
    pub fn parse(&self, source: &str, file: &str) -> Result<Program, Error> {
        let tokens = tokenizer::tokens(source, file)?;
        let cancel = CancellationToken::with_deadline(self.config.parse_deadline());
        Ok(parser::program(&tokens, &cancel)?)
    }

    /// Prepared program for `path`, parsing and caching on a miss.
    pub fn load_program(&self, path: &Path, source: &str) -> Result<Arc<Program>, Error> {
        if let Some(program) = self.prepared.load(path, source) {
            return Ok(program);
        }
        let program = Arc::new(self.parse(source, &path.display().to_string())?);
        self.prepared.insert(path, source, program.clone());
        Ok(program)
    }

    pub fn run_file(self: &Arc<Self>, path: &Path) -> Result<Option<Value>, Error> {
        self.run_file_with_globals(path, &[])
    }

    pub fn run_file_with_globals(
        self: &Arc<Self>,
        path: &Path,
        globals: &[(&str, Value)],
    ) -> Result<Option<Value>, Error> {
        let path = canonical(path)?;
        let source = read(&path)?;
        let program = self.load_program(&path, &source)?;
        let file = path.display().to_string();
        self.run_entry(&program, &file, Some(&path), globals, self.cancel.child())
    }

    /// Runs source that has no file of its own; imports resolve against
    /// the working directory.
    pub fn run_source(self: &Arc<Self>, source: &str, file: &str) -> Result<Option<Value>, Error> {
        self.run_source_with_globals(source, file, &[])
    }

    pub fn run_source_with_globals(
        self: &Arc<Self>,
        source: &str,
        file: &str,
        globals: &[(&str, Value)],
    ) -> Result<Option<Value>, Error> {
        let program = self.parse(source, file)?;
        self.run_entry(&program, file, None, globals, self.cancel.child())
    }

    /// Like [`Engine::run_source`], stopped by the caller's token instead
    /// of the engine's.
    pub fn run_source_with_cancel(
        self: &Arc<Self>,
        source: &str,
        file: &str,
        cancel: CancellationToken,
    ) -> Result<Option<Value>, Error> {
        let program = self.parse(source, file)?;
        self.run_entry(&program, file, None, &[], cancel)
    }

    fn run_entry(
        self: &Arc<Self>,
        program: &Program,
        file: &str,
        path: Option<&Path>,
        globals: &[(&str, Value)],
        cancel: CancellationToken,
    ) -> Result<Option<Value>, Error> {
        let module = self.module(file, path, cancel);
        if let Some(path) = path {
            sync::write(&self.modules).insert(path.to_path_buf(), module.clone());
        }
        let mut interpreter = self.interpreter(&module);
        for (name, value) in globals {
            interpreter.bind_host_object(name, value.clone());
        }

        let result = interpreter.run(program);
        match &result {
            Ok(_) => self.settle(&module),
            Err(err) => {
                tracing::debug!(id = module.id, error = %err, "engine.run.failed");
                module.detach();
                module.join_tasks();
            }
        }
        self.release(&module);
        Ok(result?)
    }

    /// Loads `path` once per engine. The module is registered before it
    /// runs so import cycles see the partially initialized globals.
    pub fn import_module(
        self: &Arc<Self>,
        path: &Path,
        parent: &CancellationToken,
    ) -> Result<Arc<Module>, Error> {
        if let Some(module) = self.loaded(path) {
            return Ok(module);
        }
        let source = read(path)?;
        let program = self.load_program(path, &source)?;

        let module = {
            let mut modules = sync::write(&self.modules);
            if let Some(module) = modules.get(path).filter(|m| !m.is_detached()) {
                return Ok(module.clone());
            }
            let module = self.module(&path.display().to_string(), Some(path), parent.child());
            modules.insert(path.to_path_buf(), module.clone());
            module
        };
        tracing::debug!(id = module.id, file = %module.file, "engine.import");

        if let Err(err) = self.interpreter(&module).run(&program) {
            module.detach();
            self.release(&module);
            return Err(err.into());
        }
        Ok(module)
    }

    /// Runs `path` in a fresh module that is not shared through the
    /// registry and returns its result.
    pub fn include_file(
        self: &Arc<Self>,
        path: &Path,
        parent: &CancellationToken,
    ) -> Result<(Arc<Module>, Option<Value>), Error> {
        let source = read(path)?;
        let program = self.load_program(path, &source)?;
        let module = self.module(&path.display().to_string(), Some(path), parent.child());
        tracing::debug!(id = module.id, file = %module.file, "engine.include");

        match self.interpreter(&module).run(&program) {
            Ok(value) => Ok((module, value)),
            Err(err) => {
                module.detach();
                Err(err.into())
            }
        }
    }

    /// Writes sidecars for every `.nubo` file below `dir`.
    pub fn prepare_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, Error> {
        let dir = canonical(dir)?;
        let cache = PreparedCache::new(&dir);
        let files = prepared::source_files(&dir).map_err(|source| Error::Io {
            path: dir.clone(),
            source,
        })?;

        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let source = read(&file)?;
            let program = self.parse(&source, &file.display().to_string())?;
            written.push(cache.store(&file, &source, &program)?);
        }
        tracing::info!(dir = %dir.display(), files = written.len(), "engine.prepare");
        Ok(written)
    }

    /// Cancels every running module and closes the event bus.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let modules: Vec<_> = sync::write(&self.modules).drain().map(|(_, m)| m).collect();
        for module in modules {
            module.detach();
        }
        if let Some(events) = self.events.get() {
            events.close();
        }
        tracing::debug!("engine.shutdown");
    }

    fn loaded(&self, path: &Path) -> Option<Arc<Module>> {
        sync::read(&self.modules)
            .get(path)
            .filter(|module| !module.is_detached())
            .cloned()
    }

    fn module(&self, file: &str, path: Option<&Path>, cancel: CancellationToken) -> Arc<Module> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dir = path
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.working_dir.clone());
        Arc::new(Module::new(
            id,
            Arc::from(file),
            dir,
            path.map(Path::to_path_buf),
            cancel,
        ))
    }

    fn interpreter(self: &Arc<Self>, module: &Arc<Module>) -> Interpreter {
        let interpreter = Interpreter::new(self.clone(), module.clone());
        interpreter.bind_module_globals(module.id == 1);
        interpreter
    }

    /// Waits until the module's tasks are done and no event handler is
    /// still running.
    fn settle(&self, module: &Module) {
        loop {
            module.join_tasks();
            let idle = self
                .events
                .get()
                .map_or(true, |events| events.wait_idle(SETTLE_POLL));
            if (idle && !module.has_tasks()) || module.cancel.is_cancelled() {
                return;
            }
        }
    }

    /// Detaches `module` and forgets every module that went with it.
    fn release(&self, module: &Module) {
        module.detach();
        sync::write(&self.modules).retain(|_, loaded| !loaded.is_detached());
    }
}

fn canonical(path: &Path) -> Result<PathBuf, Error> {
    path.canonicalize().map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}
