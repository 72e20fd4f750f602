//! Sidecar cache of parsed programs under `<root>/.nubo/prepared/`.

use std::{
    fs::File,
    hash::Hasher,
    io::{BufReader, BufWriter, Write},
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};

use crate::{ast::Program, sync};

const MAGIC: [u8; 5] = *b"NUBOC";
const FORMAT: u16 = 1;
pub const SIDECAR_EXTENSION: &str = "nuboc";

#[derive(Debug, thiserror::Error)]
pub enum PreparedError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: bincode::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 5],
    format: u16,
    version: String,
    hash: u64,
}

impl Header {
    fn for_source(source: &str) -> Self {
        Self {
            magic: MAGIC,
            format: FORMAT,
            version: env!("CARGO_PKG_VERSION").to_string(),
            hash: source_hash(source),
        }
    }
}

pub fn source_hash(source: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(source.as_bytes());
    hasher.finish()
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    hash: u64,
    program: Arc<Program>,
}

#[derive(Debug)]
pub struct PreparedCache {
    root: PathBuf,
    entries: RwLock<FxHashMap<PathBuf, Entry>>,
    generation: AtomicU64,
}

impl PreparedCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: RwLock::new(FxHashMap::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn sidecar_dir(&self) -> PathBuf {
        self.root.join(".nubo").join("prepared")
    }

    /// Mirrors `source` below the sidecar directory.
    pub fn sidecar_path(&self, source: &Path) -> PathBuf {
        let relative = source.strip_prefix(&self.root).unwrap_or(source);
        let mut path = self.sidecar_dir();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
        path.set_extension(SIDECAR_EXTENSION);
        path
    }

    pub fn generation(&self, path: &Path) -> Option<u64> {
        sync::read(&self.entries).get(path).map(|e| e.generation)
    }

    /// A fresh program for `source`, from memory or the sidecar; `None`
    /// means the caller has to lex and parse.
    pub fn load(&self, path: &Path, source: &str) -> Option<Arc<Program>> {
        let hash = source_hash(source);
        if let Some(entry) = sync::read(&self.entries).get(path) {
            if entry.hash == hash {
                tracing::trace!(file = %path.display(), "prepared.load.memory");
                return Some(entry.program.clone());
            }
        }

        let sidecar = self.sidecar_path(path);
        match read_sidecar(&sidecar, hash) {
            Some(program) => {
                tracing::debug!(file = %path.display(), "prepared.load.sidecar");
                let program = Arc::new(program);
                self.remember(path, hash, program.clone());
                Some(program)
            }
            None => {
                tracing::debug!(file = %path.display(), "prepared.load.miss");
                None
            }
        }
    }

    /// Keeps `program` in memory only.
    pub fn insert(&self, path: &Path, source: &str, program: Arc<Program>) {
        self.remember(path, source_hash(source), program);
    }

    /// Writes the sidecar and keeps the program in memory.
    pub fn store(&self, path: &Path, source: &str, program: &Program) -> Result<PathBuf, PreparedError> {
        let sidecar = self.sidecar_path(path);
        let io_error = |source| PreparedError::Io {
            path: sidecar.clone(),
            source,
        };
        if let Some(parent) = sidecar.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut writer = BufWriter::new(File::create(&sidecar).map_err(io_error)?);
        let encode_error = |source| PreparedError::Encode {
            path: sidecar.clone(),
            source,
        };
        bincode::serialize_into(&mut writer, &Header::for_source(source)).map_err(encode_error)?;
        bincode::serialize_into(&mut writer, program).map_err(encode_error)?;
        writer.flush().map_err(io_error)?;

        self.remember(path, source_hash(source), Arc::new(program.clone()));
        tracing::debug!(file = %path.display(), sidecar = %sidecar.display(), "prepared.store");
        Ok(sidecar)
    }

    fn remember(&self, path: &Path, hash: u64, program: Arc<Program>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        sync::write(&self.entries).insert(
            path.to_path_buf(),
            Entry {
                generation,
                hash,
                program,
            },
        );
    }
}

fn read_sidecar(sidecar: &Path, hash: u64) -> Option<Program> {
    let file = File::open(sidecar).ok()?;
    let mut reader = BufReader::new(file);
    let header: Header = bincode::deserialize_from(&mut reader).ok()?;
    let fresh = header.magic == MAGIC
        && header.format == FORMAT
        && header.version == env!("CARGO_PKG_VERSION")
        && header.hash == hash;
    if !fresh {
        return None;
    }
    bincode::deserialize_from(&mut reader).ok()
}

/// Every `.nubo` file below `dir`, skipping the `.nubo` cache directory.
pub fn source_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|name| name == ".nubo") {
                    continue;
                }
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "nubo") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{cancel::CancellationToken, parser, tokenizer};

    fn parse(source: &str, file: &str) -> Program {
        let tokens = tokenizer::tokens(source, file).unwrap();
        parser::program(&tokens, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_sidecar_round_trip_and_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app").join("main.nubo");
        let source = "let x = 1\nreturn x\n";
        let program = parse(source, "main.nubo");

        let cache = PreparedCache::new(dir.path());
        let sidecar = cache.store(&path, source, &program).unwrap();
        assert_eq!(
            sidecar,
            dir.path().join(".nubo/prepared/app/main.nuboc")
        );

        let fresh = PreparedCache::new(dir.path());
        assert_eq!(fresh.load(&path, source).as_deref(), Some(&program));
        assert_eq!(fresh.load(&path, "let x = 2\n"), None);
    }

    #[test]
    fn test_generation_bumps_on_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.nubo");
        let cache = PreparedCache::new(dir.path());
        let program = parse("return 1", "a.nubo");
        cache.insert(&path, "return 1", Arc::new(program.clone()));
        let first = cache.generation(&path).unwrap();
        cache.store(&path, "return 1", &program).unwrap();
        assert!(cache.generation(&path).unwrap() > first);
    }

    #[test]
    fn test_source_files_skip_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".nubo/prepared")).unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join(".nubo/prepared/x.nubo"), "").unwrap();
        std::fs::write(dir.path().join("lib/util.nubo"), "").unwrap();
        std::fs::write(dir.path().join("main.nubo"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = source_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("lib/util.nubo"), dir.path().join("main.nubo")]
        );
    }
}
