// CLASSIFICATION: COMMUNITY
// Filename: args.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Argument vector handed to loaded programs.

use std::ffi::{CStr, CString};

/// Maximum number of words kept from one command line.
pub const MAX_ARGS: usize = 10;

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

/// Split a command line into at most `max` words.
///
/// Words are separated by spaces, tabs and newlines; a NUL ends the line.
pub fn split_words(line: &str, max: usize) -> Vec<&str> {
    let line = line.split('\0').next().unwrap_or("");
    line.split(is_separator)
        .filter(|w| !w.is_empty())
        .take(max)
        .collect()
}

/// Ordered, NUL-terminated argument strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgVector {
    args: Vec<CString>,
}

impl ArgVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from words; anything after an interior NUL is dropped.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = words
            .into_iter()
            .filter_map(|w| {
                let w = w.as_ref();
                let w = w.split('\0').next().unwrap_or("");
                CString::new(w).ok()
            })
            .collect();
        Self { args }
    }

    pub fn from_line(line: &str, max: usize) -> Self {
        Self::from_words(split_words(line, max))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The `index`-th argument; anything outside `[0, len)` is `None`.
    pub fn get(&self, index: i64) -> Option<&CStr> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.args.get(i))
            .map(CString::as_c_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.args.iter().map(CString::as_c_str)
    }
}
