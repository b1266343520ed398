//! Compiled definitions under a directory.
//!
//! The catalog keeps every compiled `Definition` keyed by file path, together
//! with the file's size and modification time. Lookups re-stat the files and
//! only recompile the ones that changed, so edits on disk are still picked up
//! without a restart.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;

use super::definition::{definition_files, definition_name, load_definition_file, DefinitionError};
use super::model::Definition;

#[derive(Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl Stamp {
    fn of(path: &Path) -> Result<Self, DefinitionError> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

struct Compiled {
    stamp: Stamp,
    definition: Arc<Definition>,
}

/// Definitions found under one base directory, compiled once per change.
pub struct DefinitionCatalog {
    base_dir: PathBuf,
    compiled: DashMap<PathBuf, Compiled>,
}

impl DefinitionCatalog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            compiled: DashMap::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Every valid definition, sorted by name. Invalid files are skipped with
    /// a warning and deleted files are forgotten.
    pub fn list(&self) -> Result<Vec<(PathBuf, Arc<Definition>)>, DefinitionError> {
        let files = definition_files(&self.base_dir)?;
        let seen: HashSet<&PathBuf> = files.iter().collect();
        self.compiled.retain(|path, _| seen.contains(path));

        let mut found = Vec::with_capacity(files.len());
        for path in &files {
            if let Some(definition) = self.load(path)? {
                found.push((path.clone(), definition));
            }
        }
        found.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        Ok(found)
    }

    /// The definition named `name` (its file stem). Only matching files are
    /// compiled.
    pub fn get(&self, name: &str) -> Result<Option<Arc<Definition>>, DefinitionError> {
        for path in definition_files(&self.base_dir)? {
            if definition_name(&path) != name {
                continue;
            }
            if let Some(definition) = self.load(&path)? {
                return Ok(Some(definition));
            }
        }
        Ok(None)
    }

    /// Cached definition for `path`, recompiled if the file changed.
    fn load(&self, path: &Path) -> Result<Option<Arc<Definition>>, DefinitionError> {
        let stamp = Stamp::of(path)?;
        if let Some(entry) = self.compiled.get(path) {
            if entry.stamp == stamp {
                return Ok(Some(Arc::clone(&entry.definition)));
            }
        }

        match load_definition_file(path) {
            Ok(def) => {
                let definition = Arc::new(def);
                tracing::debug!(?path, name = %definition.name, "compiled definition");
                self.compiled.insert(
                    path.to_path_buf(),
                    Compiled {
                        stamp,
                        definition: Arc::clone(&definition),
                    },
                );
                Ok(Some(definition))
            }
            Err(e) => {
                tracing::warn!(?path, error = %e, "skipping invalid definition file");
                self.compiled.remove(path);
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for DefinitionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionCatalog")
            .field("base_dir", &self.base_dir)
            .field("compiled", &self.compiled.len())
            .finish()
    }
}
