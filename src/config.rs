// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Loader settings.
//!
//! Defaults may be overridden by `TWINLOAD_*` environment variables, then
//! by a TOML file, then by command-line flags.

use std::fs;
use std::path::Path;

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::args::MAX_ARGS;
use crate::fiber::MIN_STACK_SIZE;
use crate::memory::PAGE_SIZE;

pub const DEFAULT_BIAS_A: u64 = 0x8000_0000;
pub const DEFAULT_BIAS_B: u64 = 0x9000_0000;
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;
pub const DEFAULT_LINE_MAX: usize = 200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid number {0:?}")]
    Number(String),
    #[error("both images would share bias 0x{0:x}")]
    SameBias(u64),
    #[error("stack size {0} is below the minimum of {MIN_STACK_SIZE}")]
    StackTooSmall(usize),
    #[error("page size {0} is not a power of two")]
    PageSize(usize),
    #[error("line length limit {0} leaves no room for input")]
    LineMax(usize),
    #[error("argument limit must be at least 1")]
    MaxArgs,
}

/// Settings shared by the shell, one-shot and paired runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Relocation bias of the first (or only) image.
    pub bias_a: u64,
    /// Relocation bias of the second image in a paired run.
    pub bias_b: u64,
    /// Stack size of each user context.
    pub stack_size: usize,
    pub page_size: usize,
    pub max_args: usize,
    /// Longest command line the shell accepts, terminator included.
    pub line_max: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            bias_a: env_number("TWINLOAD_BIAS_A").unwrap_or(DEFAULT_BIAS_A),
            bias_b: env_number("TWINLOAD_BIAS_B").unwrap_or(DEFAULT_BIAS_B),
            stack_size: env_number("TWINLOAD_STACK_SIZE")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(DEFAULT_STACK_SIZE),
            page_size: PAGE_SIZE,
            max_args: MAX_ARGS,
            line_max: DEFAULT_LINE_MAX,
        }
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match parse_number(&raw) {
        Ok(n) => Some(n),
        Err(err) => {
            warn!("ignoring {key}: {err}");
            None
        }
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number; `_` separators
/// are allowed.
pub fn parse_number(raw: &str) -> Result<u64, ConfigError> {
    let cleaned: String = raw.trim().chars().filter(|&c| c != '_').collect();
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|_| ConfigError::Number(raw.to_string()))
}

impl LoaderConfig {
    /// Read settings from a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bias_a == self.bias_b {
            return Err(ConfigError::SameBias(self.bias_a));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::StackTooSmall(self.stack_size));
        }
        if !self.page_size.is_power_of_two() {
            return Err(ConfigError::PageSize(self.page_size));
        }
        if self.line_max < 2 {
            return Err(ConfigError::LineMax(self.line_max));
        }
        if self.max_args == 0 {
            return Err(ConfigError::MaxArgs);
        }
        Ok(())
    }
}
