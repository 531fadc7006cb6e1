// CLASSIFICATION: COMMUNITY
// Filename: minimum_stack.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Paired run on the smallest accepted stacks with every log level enabled,
//! so host calls format log records on the fiber stacks.

#![cfg(all(target_arch = "x86_64", target_os = "linux"))]

mod common;

use common::{host_with_input, print_yield_exit, ElfBuilder, Segment};
use log::LevelFilter;
use serial_test::serial;
use tempfile::tempdir;
use twinload::args::ArgVector;
use twinload::config::LoaderConfig;
use twinload::exec;
use twinload::fiber::MIN_STACK_SIZE;
use twinload::memory::LibcMapper;
use twinload::ContextId;

#[test]
#[serial]
fn paired_run_with_trace_logging_fits_minimum_stacks() {
    let _ = env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .try_init();

    let dir = tempdir().unwrap();
    let a = ElfBuilder::new(0x1000)
        .segment(Segment::load(0x1000, &print_yield_exit(b'A', 4), 0x1000))
        .write_to(dir.path(), "a.elf");
    let b = ElfBuilder::new(0x1000)
        .segment(Segment::load(0x1000, &print_yield_exit(b'B', 9), 0x1000))
        .write_to(dir.path(), "b.elf");
    let cfg = LoaderConfig {
        bias_a: 0x8e00_0000,
        bias_b: 0x9e00_0000,
        stack_size: MIN_STACK_SIZE,
        ..LoaderConfig::default()
    };
    cfg.validate().unwrap();

    let (host, sink) = host_with_input("");
    let report = exec::run_pair(&host, &LibcMapper, &cfg, &a, &b, ArgVector::new()).unwrap();
    assert_eq!(sink.text(), "A\nB\n");
    assert_eq!(report.context, ContextId::A);
    assert_eq!(report.status, 4);
    assert_eq!(report.transfers, 4);
}
