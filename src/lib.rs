// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v1.1
// Date Modified: 2026-10-19
// Author: Lukas Bower

//! Minimal loader for position-dependent ELF executables.
//!
//! Images are mapped segment by segment at their virtual addresses plus a
//! relocation bias, then entered with a pointer to a host call table. Two
//! images may run side by side on separate stacks and hand control to each
//! other explicitly.

/// ELF header and program-header decoding
pub mod image;

/// Anonymous memory mappings
pub mod memory;

/// Tracking and release of mapped segments
pub mod region;

/// Segment loader
pub mod loader;

/// Host call table layout shared with loaded programs
pub mod abi;

/// Host services behind the call table
pub mod host;

/// Argument vectors and command-line splitting
pub mod args;

/// Stack-switching fibers
pub mod fiber;

/// Cooperative scheduler for two programs
pub mod scheduler;

/// One-shot and paired execution
pub mod exec;

/// Interactive command loop
pub mod shell;

/// Loader settings
pub mod config;

/// Command-line interface
pub mod cli;

pub use abi::{HostCall, HostCallTable, ProgramEntry};
pub use host::Host;
pub use loader::{LoadedImage, LoaderError, RelocatedAddr, SegmentLoader};
pub use memory::{LibcMapper, MemoryMapper};
pub use scheduler::{ContextId, ExitReport, Scheduler};
