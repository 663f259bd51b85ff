use std::path::{Path, PathBuf};

use crate::{Result, RuntimeError};

/// Signature of the single-file frozen dataflow graph.
pub const FROZEN_GRAPH_EXT: &str = ".graph.json";
/// Signature of the interpreter module container.
pub const INTERPRETER_EXT: &str = ".tim";

/// One located on-disk artifact, resolved to exactly one backend family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelArtifact {
    /// Directory holding a compiled shared library plus `model.json` and
    /// `model.params`; the engine itself reports graph-executor vs
    /// tree-ensemble once opened.
    NativeDir(PathBuf),
    FrozenGraphFile(PathBuf),
    /// SavedModel-style layout: a `variables/` subdirectory next to the
    /// serialized graph. Loads through the frozen-graph adapter.
    SavedModelDir { dir: PathBuf, graph_file: PathBuf },
    InterpreterFile(PathBuf),
}

fn file_matches(path: &Path, ext: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(ext))
}

/// Find the unique file under `path` with the given suffix. `path` may name
/// the file directly. More than one qualifying file in the same directory is
/// a configuration error, never a silent pick.
fn find_model_file(path: &Path, ext: &str) -> Result<Option<PathBuf>> {
    if path.is_file() {
        return Ok(file_matches(path, ext).then(|| path.to_path_buf()));
    }
    if !path.is_dir() {
        return Ok(None);
    }
    let mut matches: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let candidate = entry?.path();
        if candidate.is_file() && file_matches(&candidate, ext) {
            matches.push(candidate);
        }
    }
    if matches.len() > 1 {
        matches.sort();
        return Err(RuntimeError::configuration(format!(
            "multiple {ext} files found under {}: {matches:?}",
            path.display()
        )));
    }
    Ok(matches.pop())
}

impl ModelArtifact {
    /// Priority-ordered signature scan: frozen graph, then interpreter
    /// module, then the native compiled directory as the default.
    pub fn locate(path: &Path) -> Result<ModelArtifact> {
        if !path.exists() {
            return Err(RuntimeError::configuration(format!(
                "model path {} does not exist",
                path.display()
            )));
        }

        let graph_file = find_model_file(path, FROZEN_GRAPH_EXT)?;
        let interp_file = find_model_file(path, INTERPRETER_EXT)?;
        if graph_file.is_some() && interp_file.is_some() {
            return Err(RuntimeError::configuration(format!(
                "found both {FROZEN_GRAPH_EXT} and {INTERPRETER_EXT} files under {}",
                path.display()
            )));
        }

        if let Some(graph_file) = graph_file {
            if path.is_dir() && path.join("variables").is_dir() {
                return Ok(ModelArtifact::SavedModelDir {
                    dir: path.to_path_buf(),
                    graph_file,
                });
            }
            return Ok(ModelArtifact::FrozenGraphFile(graph_file));
        }
        if let Some(interp_file) = interp_file {
            return Ok(ModelArtifact::InterpreterFile(interp_file));
        }
        if !path.is_dir() {
            return Err(RuntimeError::configuration(format!(
                "{} is not a recognized model artifact",
                path.display()
            )));
        }
        Ok(ModelArtifact::NativeDir(path.to_path_buf()))
    }

    pub fn path(&self) -> &Path {
        match self {
            ModelArtifact::NativeDir(p)
            | ModelArtifact::FrozenGraphFile(p)
            | ModelArtifact::InterpreterFile(p) => p,
            ModelArtifact::SavedModelDir { dir, .. } => dir,
        }
    }
}
