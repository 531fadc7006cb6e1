// CLASSIFICATION: COMMUNITY
// Filename: exec.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Drivers tying the loader, the host and the scheduler together.

use std::path::Path;

use log::info;
use thiserror::Error;

use crate::args::ArgVector;
use crate::config::LoaderConfig;
use crate::host::Host;
use crate::loader::{LoadedImage, LoaderError, SegmentLoader};
use crate::memory::{MapError, MemoryMapper};
use crate::region::RegionTracker;
use crate::scheduler::{ContextId, ExitReport, Scheduler, SchedulerError};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{path}: {source}")]
    Load {
        path: String,
        #[source]
        source: LoaderError,
    },
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("failed to release image memory: {0}")]
    Release(#[from] MapError),
}

impl ExecError {
    /// The image file could not be opened at all.
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            ExecError::Load {
                source: LoaderError::Open { .. },
                ..
            }
        )
    }
}

fn load<M: MemoryMapper>(
    mapper: &M,
    config: &LoaderConfig,
    path: &Path,
    bias: u64,
) -> Result<LoadedImage, ExecError> {
    SegmentLoader::new(mapper)
        .with_page_size(config.page_size)
        .load_path(path, bias)
        .map_err(|source| ExecError::Load {
            path: path.display().to_string(),
            source,
        })
}

/// Load one image at `config.bias_a`, run it to completion and release its
/// memory.
pub fn run_once<M: MemoryMapper>(
    host: &Host,
    mapper: &M,
    config: &LoaderConfig,
    path: &Path,
    args: ArgVector,
) -> Result<ExitReport, ExecError> {
    let mut image = load(mapper, config, path, config.bias_a)?;
    host.set_args(args);
    info!("running {} from entry {}", path.display(), image.entry());

    let outcome = Scheduler::new(host, config.stack_size).and_then(|mut sched| {
        // SAFETY: the regions stay mapped until after the scheduler is gone.
        sched.spawn(ContextId::A, unsafe { image.program_entry() })?;
        sched.run()
    });
    // SAFETY: the program has exited and its scheduler has been dropped.
    unsafe { image.regions_mut().release_all(mapper) }?;
    Ok(outcome?)
}

/// Load two images at disjoint biases and let them run cooperatively until
/// one exits. Both images stay mapped afterwards.
pub fn run_pair<M: MemoryMapper>(
    host: &Host,
    mapper: &M,
    config: &LoaderConfig,
    path_a: &Path,
    path_b: &Path,
    args: ArgVector,
) -> Result<ExitReport, ExecError> {
    let image_a = load(mapper, config, path_a, config.bias_a)?;
    let image_b = load(mapper, config, path_b, config.bias_b)?;
    host.set_args(args);

    let mut sched = Scheduler::new(host, config.stack_size)?;
    // SAFETY: both images remain resident for the rest of the process.
    sched.spawn(ContextId::A, unsafe { image_a.program_entry() })?;
    sched.spawn(ContextId::B, unsafe { image_b.program_entry() })?;
    let report = sched.run()?;
    keep_resident(image_a.into_regions());
    keep_resident(image_b.into_regions());
    Ok(report)
}

fn keep_resident(regions: RegionTracker) {
    info!(
        "leaving {} region(s), 0x{:x} bytes, mapped",
        regions.len(),
        regions.total_bytes()
    );
}
