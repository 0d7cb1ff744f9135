// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound message union (§3, §6): frames a client may send after hello.

use serde::{Deserialize, Serialize};

/// A single staged file for project-mode execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecFiles {
    pub path: String,
    pub content: String,
}

/// The inbound frame union.
///
/// `Exec` carries raw, unvalidated fields; callers resolve the execution
/// mode via [`Frame::exec_mode`] rather than matching fields directly,
/// since the same wire shape backs three mutually exclusive modes (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Exec {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        files: Option<Vec<ExecFiles>>,
        #[serde(default)]
        entry: Option<String>,
        #[serde(default)]
        workspace_root: Option<String>,
        #[serde(default)]
        timeout_s: Option<u64>,
        #[serde(default)]
        python_exe: Option<String>,
    },
    Cancel {
        run_id: String,
    },
    RequestSystemInfo,
}

/// The resolved execution mode for an `exec` frame (§4.A, §6).
#[derive(Debug, Clone, PartialEq)]
pub enum ExecMode {
    Inline {
        code: String,
    },
    Project {
        files: Vec<ExecFiles>,
        entry: String,
    },
    Workspace {
        workspace_root: String,
        entry: String,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExecModeError {
    #[error("exec frame is missing code, or files+entry, or workspace_root+entry")]
    Incomplete,
}

impl Frame {
    /// Resolve which of the three execution modes an `exec` frame selects.
    ///
    /// Precedence (§6): `workspace_root`+`entry` wins over `files`+`entry`,
    /// which wins over bare `code`. Returns `None` for non-`exec` frames.
    pub fn exec_mode(&self) -> Option<Result<ExecMode, ExecModeError>> {
        match self {
            Frame::Exec {
                code,
                files,
                entry,
                workspace_root,
                ..
            } => {
                let mode = if let (Some(root), Some(entry)) = (workspace_root, entry) {
                    ExecMode::Workspace {
                        workspace_root: root.clone(),
                        entry: entry.clone(),
                    }
                } else if let (Some(files), Some(entry)) = (files, entry) {
                    ExecMode::Project {
                        files: files.clone(),
                        entry: entry.clone(),
                    }
                } else if let Some(code) = code {
                    ExecMode::Inline { code: code.clone() }
                } else {
                    return Some(Err(ExecModeError::Incomplete));
                };
                Some(Ok(mode))
            }
            _ => None,
        }
    }

    pub fn timeout_s(&self) -> Option<u64> {
        match self {
            Frame::Exec { timeout_s, .. } => *timeout_s,
            _ => None,
        }
    }

    pub fn python_exe(&self) -> Option<&str> {
        match self {
            Frame::Exec { python_exe, .. } => python_exe.as_deref(),
            _ => None,
        }
    }
}
