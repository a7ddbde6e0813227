use crate::language::{synth::array_name, types::TypeRef};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "cauldron.toml";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{}: {error}", path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("{}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("module `{module}` points at {}: {error}", path.display())]
    ModulePath {
        module: String,
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("{}{message}", module.as_ref().map(|name| format!("module `{name}`: ")).unwrap_or_default())]
    InvalidModule {
        module: Option<String>,
        message: String,
    },
    #[error("array element `{elem}` is not a type: {message}")]
    InvalidArray { elem: String, message: String },
}

#[derive(Debug, Deserialize, Default)]
struct RawManifest {
    #[serde(default)]
    hot: RawHot,
    #[serde(default)]
    runtime: RawRuntime,
    #[serde(default)]
    modules: Vec<RawModuleEntry>,
    #[serde(default)]
    arrays: Vec<RawArrayEntry>,
}

#[derive(Debug, Deserialize, Default)]
struct RawHot {
    path: Option<String>,
    frame_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawRuntime {
    heap_limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawModuleEntry {
    name: String,
    path: String,
    #[serde(default)]
    deps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawArrayEntry {
    elem: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotSettings {
    pub path: Option<PathBuf>,
    pub frame_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for HotSettings {
    fn default() -> Self {
        Self {
            path: None,
            frame_ms: 16,
            poll_interval_ms: 50,
        }
    }
}

/// A library module compiled once at startup, before the hot module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEntry {
    pub name: String,
    pub path: PathBuf,
    pub deps: Vec<String>,
}

/// `cauldron.toml`: the hot module, its fixed dependency set and runtime limits.
#[derive(Debug)]
pub struct Manifest {
    pub path: PathBuf,
    root: PathBuf,
    pub hot: HotSettings,
    pub heap_limit: u64,
    pub modules: Vec<ModuleEntry>,
    pub arrays: Vec<TypeRef>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|error| ManifestError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::parse(path, &content)
    }

    /// Parses manifest text; relative paths resolve against the directory of `path`.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(content).map_err(|error| ManifestError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        let root = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let defaults = HotSettings::default();
        let hot = HotSettings {
            path: raw.hot.path.map(|rel| root.join(rel)),
            frame_ms: raw.hot.frame_ms.unwrap_or(defaults.frame_ms),
            poll_interval_ms: raw.hot.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        };

        let arrays = raw
            .arrays
            .into_iter()
            .map(|entry| {
                TypeRef::parse(&entry.elem).map_err(|err| ManifestError::InvalidArray {
                    elem: entry.elem.clone(),
                    message: err.message,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let array_names: Vec<String> = arrays.iter().map(array_name).collect();

        let mut modules: Vec<ModuleEntry> = Vec::with_capacity(raw.modules.len());
        for entry in raw.modules {
            if modules.iter().any(|existing| existing.name == entry.name) {
                return Err(ManifestError::InvalidModule {
                    module: Some(entry.name),
                    message: "duplicate module entry".into(),
                });
            }
            if let Some(dep) = entry.deps.iter().find(|dep| {
                !modules.iter().any(|existing| &existing.name == *dep) && !array_names.contains(dep)
            }) {
                return Err(ManifestError::InvalidModule {
                    module: Some(entry.name.clone()),
                    message: format!(
                        "dependency `{dep}` must be an earlier module or a declared array"
                    ),
                });
            }
            let resolved = root.join(&entry.path);
            let canonical = resolved
                .canonicalize()
                .map_err(|error| ManifestError::ModulePath {
                    module: entry.name.clone(),
                    path: resolved.clone(),
                    error,
                })?;
            modules.push(ModuleEntry {
                name: entry.name,
                path: canonical,
                deps: entry.deps,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            root,
            hot,
            heap_limit: raw
                .runtime
                .heap_limit
                .unwrap_or(crate::language::compiler::DEFAULT_HEAP_LIMIT),
            modules,
            arrays,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Looks for `cauldron.toml` in `start` and its ancestors.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(MANIFEST_FILE))
        .find(|candidate| candidate.is_file())
}
