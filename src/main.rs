// CLASSIFICATION: COMMUNITY
// Filename: main.rs v1.1
// Date Modified: 2026-10-19
// Author: Lukas Bower

//! Entry point for the `twinload` binary.

use twinload::cli;

fn main() {
    env_logger::init();
    match cli::run() {
        Ok(status) => std::process::exit(status),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}
