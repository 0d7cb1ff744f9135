// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace/Project Stager (§4.J): turns an `ExecMode` into a concrete
//! interpreter invocation — program, args, cwd, and environment — ready
//! for the Supervisor to spawn.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kd_core::frame::ExecMode;
use kd_core::path::{validate_path, PathError};
use tempfile::TempDir;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("invalid path: {0}")]
    Path(#[from] PathError),
    #[error("entry not found in files")]
    EntryNotInFiles,
    #[error("workspace_root is not a directory")]
    WorkspaceRootNotADirectory,
    #[error("entry not found")]
    EntryNotFound,
    #[error("failed to stage files: {0}")]
    Io(#[from] std::io::Error),
}

/// A concrete, ready-to-spawn interpreter invocation.
pub struct StagedRun {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Present for project/workspace runs: the traceback-rewrite prefix
    /// the Supervisor strips from stderr `File "..."` lines (§4.C).
    pub trace_root: Option<String>,
    /// Kept alive until the child has exited; dropping deletes the
    /// staged temp directory.
    pub _tempdir_guard: Option<TempDir>,
}

fn base_env() -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars().collect();
    env.push(("PYTHONUTF8".to_string(), "1".to_string()));
    env.push(("PYTHONIOENCODING".to_string(), "utf-8".to_string()));
    env
}

fn prepend_pythonpath(env: &mut Vec<(String, String)>, prefix: &Path) {
    let existing = env
        .iter()
        .position(|(k, _)| k == "PYTHONPATH")
        .map(|idx| env.remove(idx).1);
    let joined = match existing {
        Some(existing) if !existing.is_empty() => {
            format!("{}{}{}", prefix.display(), path_sep(), existing)
        }
        _ => prefix.display().to_string(),
    };
    env.push(("PYTHONPATH".to_string(), joined));
}

#[cfg(windows)]
fn path_sep() -> &'static str {
    ";"
}

#[cfg(not(windows))]
fn path_sep() -> &'static str {
    ":"
}

fn venv_python(root: &Path) -> Option<PathBuf> {
    let venv = root.join(".venv");
    let candidate = if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    };
    candidate.is_file().then_some(candidate)
}

fn venv_bin_dir(root: &Path) -> PathBuf {
    let venv = root.join(".venv");
    if cfg!(windows) {
        venv.join("Scripts")
    } else {
        venv.join("bin")
    }
}

/// Stage the given execution mode into a [`StagedRun`].
///
/// `python_exe` overrides the interpreter for inline/project runs and the
/// default (no-venv) case for workspace runs; when `None`, the kernel's
/// own interpreter is used (`std::env::current_exe` is not appropriate
/// here — callers pass the interpreter path explicitly since this crate
/// does not embed a Python runtime of its own).
pub fn stage(mode: &ExecMode, python_exe: &str) -> Result<StagedRun, StagingError> {
    match mode {
        ExecMode::Inline { code } => Ok(StagedRun {
            program: PathBuf::from(python_exe),
            args: vec!["-X".into(), "utf8".into(), "-u".into(), "-c".into(), code.clone()],
            cwd: None,
            env: base_env(),
            trace_root: None,
            _tempdir_guard: None,
        }),
        ExecMode::Project { files, entry } => stage_project(files, entry, python_exe),
        ExecMode::Workspace {
            workspace_root,
            entry,
        } => stage_workspace(workspace_root, entry, python_exe),
    }
}

fn stage_project(
    files: &[kd_core::frame::ExecFiles],
    entry: &str,
    python_exe: &str,
) -> Result<StagedRun, StagingError> {
    let entry_norm = validate_path(entry)?;

    let mut file_map: BTreeMap<String, &str> = BTreeMap::new();
    for f in files {
        let norm = validate_path(&f.path)?;
        file_map.insert(norm, f.content.as_str());
    }
    if !file_map.contains_key(&entry_norm) {
        return Err(StagingError::EntryNotInFiles);
    }

    let tempdir = TempDir::with_prefix("deepinsight_")?;
    let root = tempdir.path().to_path_buf();
    for (rel, content) in &file_map {
        let target = root.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, content)?;
    }

    let entry_path = root.join(&entry_norm);
    let mut env = base_env();
    prepend_pythonpath(&mut env, &root);

    Ok(StagedRun {
        program: PathBuf::from(python_exe),
        args: vec![
            "-X".into(),
            "utf8".into(),
            "-u".into(),
            entry_path.display().to_string(),
        ],
        cwd: Some(root.clone()),
        env,
        trace_root: Some(root.display().to_string()),
        _tempdir_guard: Some(tempdir),
    })
}

fn stage_workspace(
    workspace_root: &str,
    entry: &str,
    default_python_exe: &str,
) -> Result<StagedRun, StagingError> {
    let root = Path::new(workspace_root)
        .canonicalize()
        .map_err(|_| StagingError::WorkspaceRootNotADirectory)?;
    if !root.is_dir() {
        return Err(StagingError::WorkspaceRootNotADirectory);
    }

    let entry_norm = validate_path(entry)?;
    let entry_path = root.join(&entry_norm);
    if !entry_path.is_file() {
        return Err(StagingError::EntryNotFound);
    }

    let mut env = base_env();
    prepend_pythonpath(&mut env, &root);

    let mut python_exe = PathBuf::from(default_python_exe);
    if let Some(venv_py) = venv_python(&root) {
        python_exe = venv_py;
        env.push((
            "VIRTUAL_ENV".to_string(),
            root.join(".venv").display().to_string(),
        ));
        let bin_dir = venv_bin_dir(&root);
        let existing_path = env
            .iter()
            .position(|(k, _)| k == "PATH")
            .map(|idx| env.remove(idx).1)
            .unwrap_or_default();
        env.push((
            "PATH".to_string(),
            format!("{}{}{}", bin_dir.display(), path_sep(), existing_path),
        ));
    }

    Ok(StagedRun {
        program: python_exe,
        args: vec![
            "-X".into(),
            "utf8".into(),
            "-u".into(),
            entry_path.display().to_string(),
        ],
        cwd: Some(root.clone()),
        env,
        trace_root: Some(root.display().to_string()),
        _tempdir_guard: None,
    })
}
