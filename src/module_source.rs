//! Module source resolution and caching
//!
//! A module name such as `utils/math` maps to the file `utils/math.uttr`,
//! searched for in this order:
//! - the directory of the importing file
//! - the process working directory
//! - the standard library directory
//!
//! Loaded modules are cached by canonical path for the lifetime of the
//! loader, so a module body runs at most once. The stack of modules currently
//! loading detects import cycles; entries are pushed through a
//! [`LoadingGuard`] that pops them again however the load ends.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::lexer::SourceFile;
use crate::symbol_table::EnvId;

/// File extension of module files
pub const MODULE_EXTENSION: &str = "uttr";

/// Environment variable naming the standard library directory
pub const STDLIB_ENV_VAR: &str = "UTTR_STDLIB";

/// A loaded module
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub path: PathBuf,
    /// The module's own top-level environment
    pub env: EnvId,
    pub file: Rc<SourceFile>,
}

type LoadingStack = Rc<RefCell<Vec<(PathBuf, String)>>>;

/// Resolves, caches and tracks modules for one interpreter
#[derive(Debug)]
pub struct ModuleLoader {
    stdlib_dir: PathBuf,
    cache: HashMap<PathBuf, Rc<Module>>,
    loading: LoadingStack,
}

/// Marks a module as loading until dropped
#[must_use]
pub struct LoadingGuard {
    loading: LoadingStack,
    path: PathBuf,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let mut loading = self.loading.borrow_mut();
        if let Some(index) = loading.iter().rposition(|(path, _)| *path == self.path) {
            loading.remove(index);
        }
    }
}

impl ModuleLoader {
    pub fn new(stdlib_dir: PathBuf) -> Self {
        Self {
            stdlib_dir,
            cache: HashMap::new(),
            loading: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn stdlib_dir(&self) -> &Path {
        &self.stdlib_dir
    }

    /// Directories searched for a module, in priority order
    pub fn search_dirs(&self, importer_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = importer_dir {
            dirs.push(dir.to_path_buf());
        }
        if let Ok(cwd) = std::env::current_dir() {
            dirs.push(cwd);
        }
        dirs.push(self.stdlib_dir.clone());

        let mut seen = HashSet::new();
        dirs.retain(|dir| seen.insert(dir.clone()));
        dirs
    }

    /// Find the file for a module name.
    ///
    /// On failure, returns every candidate path that was tried.
    pub fn resolve(&self, name: &str, importer_dir: Option<&Path>) -> Result<PathBuf, Vec<PathBuf>> {
        let relative = module_file_name(name);
        let mut searched = Vec::new();

        for dir in self.search_dirs(importer_dir) {
            let candidate = dir.join(&relative);
            debug!("Trying module candidate {}", candidate.display());
            if candidate.is_file() {
                return Ok(fs::canonicalize(&candidate).unwrap_or(candidate));
            }
            searched.push(candidate);
        }

        Err(searched)
    }

    /// A previously loaded module
    pub fn cached(&self, path: &Path) -> Option<Rc<Module>> {
        let module = self.cache.get(path).cloned();
        if module.is_some() {
            debug!("Module cache hit for {}", path.display());
        }
        module
    }

    pub fn insert(&mut self, module: Rc<Module>) {
        self.cache.insert(module.path.clone(), module);
    }

    /// Number of cached modules
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Mark a module as loading.
    ///
    /// Fails with the chain of module names when the module is already
    /// loading further up the import stack.
    pub fn begin_loading(&self, path: &Path, name: &str) -> Result<LoadingGuard, Vec<String>> {
        let mut loading = self.loading.borrow_mut();
        if loading.iter().any(|(p, _)| p == path) {
            let mut chain: Vec<String> = loading.iter().map(|(_, n)| n.clone()).collect();
            chain.push(name.to_string());
            return Err(chain);
        }

        loading.push((path.to_path_buf(), name.to_string()));
        debug!("Loading module '{}' from {}", name, path.display());
        Ok(LoadingGuard {
            loading: Rc::clone(&self.loading),
            path: path.to_path_buf(),
        })
    }

    /// Names of modules currently loading, outermost first
    pub fn loading_chain(&self) -> Vec<String> {
        self.loading.borrow().iter().map(|(_, n)| n.clone()).collect()
    }
}

/// Relative file path for a module name: `a/b` -> `a/b.uttr`
pub fn module_file_name(name: &str) -> PathBuf {
    let mut path: PathBuf = name.split('/').collect();
    path.set_extension(MODULE_EXTENSION);
    path
}

/// Standard library directory when none is configured explicitly.
///
/// Uses `UTTR_STDLIB` if set, then `<data dir>/uttr/stdlib` if it exists,
/// then `stdlib` under the working directory.
pub fn default_stdlib_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(STDLIB_ENV_VAR) {
        return PathBuf::from(dir);
    }

    if let Some(data_dir) = dirs::data_dir() {
        let candidate = data_dir.join("uttr").join("stdlib");
        if candidate.is_dir() {
            return candidate;
        }
    }

    std::env::current_dir()
        .map(|cwd| cwd.join("stdlib"))
        .unwrap_or_else(|_| PathBuf::from("stdlib"))
}

/// Directory of the unit being run, if its name is an existing file
pub fn unit_dir(unit_name: &str) -> Option<PathBuf> {
    let path = Path::new(unit_name);
    if !path.is_file() {
        return None;
    }
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    path.parent().map(Path::to_path_buf)
}
