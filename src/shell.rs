// CLASSIFICATION: COMMUNITY
// Filename: shell.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Interactive front end: read a command line, run the named image once.

use std::path::Path;

use log::{info, warn};

use crate::args::{split_words, ArgVector};
use crate::config::LoaderConfig;
use crate::exec::{self, ExecError};
use crate::host::Host;
use crate::memory::MemoryMapper;

const PROMPT: &[u8] = b"> ";

/// Run the command loop until `quit` or end of input.
///
/// Returns the process exit status. Images that cannot be opened are
/// skipped; any other load failure ends the loop with an error.
pub fn run<M: MemoryMapper>(host: &Host, mapper: &M, config: &LoaderConfig) -> Result<i32, ExecError> {
    let mut line = vec![0u8; config.line_max];
    loop {
        host.print(PROMPT);
        let read = host.read_line(&mut line);
        let text = String::from_utf8_lossy(&line[..read.len]).into_owned();
        let words = split_words(&text, config.max_args);

        if words.is_empty() {
            if read.eof {
                host.print(b"\n");
                return Ok(0);
            }
            continue;
        }
        if words == ["quit"] {
            return Ok(0);
        }

        let path = Path::new(words[0]);
        match exec::run_once(host, mapper, config, path, ArgVector::from_words(&words)) {
            Ok(report) => info!("{} finished with status {}", words[0], report.status),
            Err(err) if err.is_open_failure() => warn!("{err}"),
            Err(err) => return Err(err),
        }
        if read.eof {
            return Ok(0);
        }
    }
}
