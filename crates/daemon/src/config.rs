// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration (SPEC_FULL §3.1): argv with an environment-variable
//! fallback, no config file — this system has no persistent run storage to
//! root a config file against, so argv/env is the whole story, following
//! the teacher's `Config::for_project` pattern of deriving settings from a
//! single source rather than a file on disk.

use std::net::SocketAddr;
use thiserror::Error;

const DEFAULT_BIND: &str = "127.0.0.1:8901";
const DEFAULT_PYTHON: &str = "python3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address {0:?}: {1}")]
    InvalidBindAddr(String, std::net::AddrParseError),
}

pub struct Config {
    pub bind_addr: SocketAddr,
    pub python_exe: String,
}

impl Config {
    /// Resolve the bind address from argv[1], then `KERNELD_BIND`, then a
    /// fixed default; the interpreter to launch child runs with from
    /// `KERNELD_PYTHON`, defaulting to `python3`.
    pub fn from_env_and_args() -> Result<Self, ConfigError> {
        let bind_raw = std::env::args()
            .nth(1)
            .or_else(|| std::env::var("KERNELD_BIND").ok())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind_raw
            .parse()
            .map_err(|e| ConfigError::InvalidBindAddr(bind_raw.clone(), e))?;
        let python_exe = std::env::var("KERNELD_PYTHON").unwrap_or_else(|_| DEFAULT_PYTHON.to_string());
        Ok(Self { bind_addr, python_exe })
    }
}
