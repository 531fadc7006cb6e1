// CLASSIFICATION: COMMUNITY
// Filename: cli.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Command-line surface of the `twinload` binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::args::ArgVector;
use crate::config::{parse_number, LoaderConfig};
use crate::exec;
use crate::host::Host;
use crate::image;
use crate::memory::LibcMapper;
use crate::shell;

#[derive(Parser)]
#[command(name = "twinload", about = "Load ELF images and run them cooperatively", version)]
pub struct Cli {
    /// TOML file with loader settings.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stack size of each user context in bytes.
    #[arg(long, global = true, value_parser = parse_size)]
    stack_size: Option<usize>,

    /// Relocation bias of the first image.
    #[arg(long, global = true, value_parser = parse_addr)]
    bias_a: Option<u64>,

    /// Relocation bias of the second image.
    #[arg(long, global = true, value_parser = parse_addr)]
    bias_b: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive loop: each line names an image and its arguments.
    Shell,
    /// Load one image, run it and release it.
    Run {
        image: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Load two images and let them yield to each other.
    Pair {
        image_a: PathBuf,
        image_b: PathBuf,
        /// Argument visible to both programs (repeatable).
        #[arg(long = "arg")]
        args: Vec<String>,
    },
    /// Print the entry point and program headers of an image.
    Info {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn parse_addr(raw: &str) -> Result<u64, String> {
    parse_number(raw).map_err(|e| e.to_string())
}

fn parse_size(raw: &str) -> Result<usize, String> {
    parse_addr(raw).and_then(|n| usize::try_from(n).map_err(|e| e.to_string()))
}

impl Cli {
    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut cfg = match &self.config {
            Some(path) => LoaderConfig::from_file(path)?,
            None => LoaderConfig::default(),
        };
        if let Some(size) = self.stack_size {
            cfg.stack_size = size;
        }
        if let Some(bias) = self.bias_a {
            cfg.bias_a = bias;
        }
        if let Some(bias) = self.bias_b {
            cfg.bias_b = bias;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Parse arguments, execute the command and return the exit status.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = cli.loader_config()?;
    let host = Host::stdio();
    let mapper = LibcMapper;

    let outcome = match cli.command.unwrap_or(Commands::Shell) {
        Commands::Shell => shell::run(&host, &mapper, &cfg),
        Commands::Run { image, args } => {
            let argv = std::iter::once(image.display().to_string()).chain(args);
            exec::run_once(&host, &mapper, &cfg, &image, ArgVector::from_words(argv))
                .map(|report| report.status)
        }
        Commands::Pair {
            image_a,
            image_b,
            args,
        } => exec::run_pair(&host, &mapper, &cfg, &image_a, &image_b, ArgVector::from_words(args))
            .map(|_| {
                host.print(b"done\n");
                0
            }),
        Commands::Info { image, json } => return info(&image, json),
    };

    match outcome {
        Ok(status) => Ok(status),
        Err(err) => {
            // Load failures are reported on the programs' output stream.
            host.print(format!("{err}\n").as_bytes());
            Ok(1)
        }
    }
}

fn info(path: &Path, json: bool) -> Result<i32> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let summary = image::inspect(&data).with_context(|| format!("inspect {}", path.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(0);
    }
    println!("entry 0x{:x}", summary.entry);
    println!("{:<8} {:>10} {:>18} {:>10} {:>10} flags", "type", "offset", "vaddr", "filesz", "memsz");
    for seg in &summary.segments {
        println!(
            "{:<8} {:>#10x} {:>#18x} {:>#10x} {:>#10x} {}",
            seg.kind, seg.offset, seg.vaddr, seg.filesz, seg.memsz, seg.flags
        );
    }
    Ok(0)
}
