use std::path::PathBuf;

use crate::{
    ast::{Expression, Import, ImportKind},
    error::{Error, ExecutionError, ExecutionErrorKind, WithSpan},
    span::Span,
    sync,
    value::Value,
};

use super::{scope::Binding, ImportEntry, Interpreter};

impl Interpreter {
    pub(crate) fn import(&mut self, import: &Import, span: &Span) -> Result<(), ExecutionError> {
        let entry = if import.path.starts_with('@') {
            ImportEntry::Package(self.package(&import.path, span)?)
        } else {
            let path = self.resolve_path(&import.path, span)?;
            tracing::debug!(id = self.module.id, path = %path.display(), "interpreter.import.file");
            let module = self
                .engine
                .import_module(&path, &self.module.cancel)
                .map_err(|err| nested_error(err, span))?;
            self.module.add_dependent(module.clone());
            ImportEntry::Module(module)
        };

        match &import.kind {
            ImportKind::Module(alias) => {
                let mut imports = sync::write(&self.module.imports);
                if imports.contains_key(alias) {
                    return Err(ExecutionError::new(
                        ExecutionErrorKind::Import(format!("'{alias}' is already imported")),
                        span.clone(),
                    ));
                }
                imports.insert(alias.clone(), entry);
            }
            ImportKind::Selected(names) => {
                for (name, alias) in names {
                    let value = self.import_member(&entry, &import.path, name, span)?;
                    sync::write(&self.scope)
                        .declare(alias.as_deref().unwrap_or(name), Binding::constant(value))
                        .at(span)?;
                }
            }
            ImportKind::Run => {}
        }
        Ok(())
    }

    fn package(&self, path: &str, span: &Span) -> Result<Value, ExecutionError> {
        if let Some(name) = path.strip_prefix("@std/") {
            if !self.engine.config().runtime.std.allows(name) {
                return Err(ExecutionError::new(
                    ExecutionErrorKind::Import(format!("package '{path}' is not allowed")),
                    span.clone(),
                ));
            }
        }
        self.engine
            .package(path)
            .ok_or_else(|| ExecutionErrorKind::Import(format!("unknown package '{path}'")))
            .at(span)
    }

    /// Applies configured prefixes, falls back to the module's directory
    /// and defaults the extension to `.nubo`.
    fn resolve_path(&self, raw: &str, span: &Span) -> Result<PathBuf, ExecutionError> {
        let config = self.engine.config();
        let mut prefixes: Vec<_> = config.runtime.interpreter.import.prefix.iter().collect();
        prefixes.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));

        let working_dir = self.engine.working_dir().display().to_string();
        let mut path = prefixes
            .into_iter()
            .find_map(|(prefix, target)| {
                let rest = raw.strip_prefix(prefix.as_str())?;
                let base = target.replace("{current_dir}", &working_dir);
                Some(PathBuf::from(base).join(rest.trim_start_matches('/')))
            })
            .unwrap_or_else(|| self.module.dir.join(raw));
        if path.extension().is_none() {
            path.set_extension("nubo");
        }

        path.canonicalize()
            .map_err(|err| ExecutionErrorKind::Import(format!("cannot import '{raw}': {err}")))
            .at(span)
    }

    /// Runs another file in a fresh module and yields its return value.
    pub(crate) fn include(&mut self, target: &Expression, span: &Span) -> Result<Option<Value>, ExecutionError> {
        let raw = match self.evaluate(target)? {
            Value::String(raw) => raw,
            other => {
                return Err(ExecutionError::new(
                    ExecutionErrorKind::TypeMismatch(format!(
                        "include expects a string path, got {}",
                        other.type_of()
                    )),
                    target.span.clone(),
                ))
            }
        };
        let path = self.resolve_path(&raw, span)?;
        tracing::debug!(id = self.module.id, path = %path.display(), "interpreter.include");
        let (module, value) = self
            .engine
            .include_file(&path, &self.module.cancel)
            .map_err(|err| nested_error(err, span))?;
        self.module.add_dependent(module);
        Ok(value)
    }
}

/// Keeps the failing file's own locator and records the import site.
fn nested_error(err: Error, span: &Span) -> ExecutionError {
    match err {
        Error::Execution(err) => err.with_trace(span),
        Error::Tokenize(err) => {
            let at = err.span().clone();
            ExecutionError::new(ExecutionErrorKind::Syntax(err.to_string()), at).with_trace(span)
        }
        Error::Parse(errors) if errors.is_cancelled() => {
            ExecutionError::new(ExecutionErrorKind::Cancelled, span.clone())
        }
        Error::Parse(errors) => {
            let at = errors
                .first()
                .and_then(|first| first.span())
                .cloned()
                .unwrap_or_else(|| span.clone());
            ExecutionError::new(ExecutionErrorKind::Syntax(errors.to_string()), at).with_trace(span)
        }
        other => ExecutionError::new(ExecutionErrorKind::Import(other.to_string()), span.clone()),
    }
}
