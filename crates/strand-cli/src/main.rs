// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! strand command-line driver.

mod output;
mod render;

use std::process;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use strand_rt::config::{parse_size, FIBER_STACK_ENV, WORKERS_ENV};
use strand_rt::{Scheduler, SchedulerConfig, FIBER_BACKEND, MIN_FIBER_STACK_SIZE};
use tracing_subscriber::EnvFilter;

use crate::render::RenderOptions;

#[derive(Parser, Debug)]
#[command(name = "strand", version, about = "Fiber job scheduler workload driver")]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). Otherwise RUST_LOG applies.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Shade a procedural image in tiles on the scheduler.
    Render(RenderArgs),
    /// Print the resolved scheduler configuration.
    Info,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Root tile edge in pixels.
    #[arg(long, default_value_t = 64)]
    tile: u32,

    /// Worker threads [default: STRAND_WORKERS or all cores].
    #[arg(long)]
    workers: Option<usize>,

    /// Fiber stack size, e.g. 64k or 1m [default: STRAND_FIBER_STACK or 256k].
    #[arg(long, value_parser = parse_stack_size)]
    stack_size: Option<usize>,

    /// Subdivide tiles from inside tasks until no edge exceeds this (0 = never).
    #[arg(long, default_value_t = 16)]
    split: u32,
}

fn main() {
    let cli = Cli::parse();
    output::init();
    init_tracing(cli.verbose);

    let result = match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Info => cmd_info(),
    };
    if let Err(err) = result {
        eprintln!("{}: {:#}", output::error_label(), err);
        process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .init();
}

fn parse_stack_size(raw: &str) -> Result<usize, String> {
    parse_size(raw).ok_or_else(|| format!("`{}` is not a byte count (try 64k or 1m)", raw))
}

/// Environment over defaults, flags over environment.
fn resolve_config(workers: Option<usize>, stack_size: Option<usize>) -> anyhow::Result<SchedulerConfig> {
    let mut config = SchedulerConfig::from_env().context("invalid STRAND_* environment")?;
    if let Some(workers) = workers {
        config.worker_threads = workers;
    }
    if let Some(bytes) = stack_size {
        config.fiber_stack_size = bytes;
    }
    config.validate()?;
    Ok(config)
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let config = resolve_config(args.workers, args.stack_size)?;
    let stack_size = config.fiber_stack_size;
    let sched = Scheduler::new(config);

    let opts = RenderOptions {
        width: args.width,
        height: args.height,
        tile: args.tile,
        split: args.split,
    };
    let (image, report) = render::render(&sched, &opts)?;
    let centre = image.get(image.width() / 2, image.height() / 2);

    println!("{}", output::banner_ok("render"));
    println!("{}", output::field("image", format!("{}x{}", opts.width, opts.height)));
    println!(
        "{}",
        output::field(
            "tiles",
            format!("{} root, {} shaded", report.root_tiles, report.shaded_tiles)
        )
    );
    println!("{}", output::field("workers", report.stats.workers));
    println!("{}", output::field("fiber stack", output::bytes(stack_size)));
    println!("{}", output::field("tasks", report.stats.total_tasks));
    println!("{}", output::field("fibers created", report.stats.fibers_created));
    println!("{}", output::field("elapsed", output::duration(report.elapsed)));
    println!("{}", output::field("centre pixel", format!("#{:06x}", centre)));
    println!("{}", output::field("checksum", output::checksum(report.checksum)));
    Ok(())
}

fn cmd_info() -> anyhow::Result<()> {
    let config = resolve_config(None, None)?;

    println!("{}", output::section_header("strand"));
    println!("{}", output::field("version", env!("CARGO_PKG_VERSION")));
    println!("{}", output::field("backend", FIBER_BACKEND));
    println!();
    println!("{}", output::section_header("scheduler"));
    println!("{}", output::field("workers", config.worker_threads));
    println!("{}", output::field("fiber stack", output::bytes(config.fiber_stack_size)));
    println!("{}", output::field("min stack", output::bytes(MIN_FIBER_STACK_SIZE)));
    println!();
    println!("{}", output::section_header("environment"));
    for var in [WORKERS_ENV, FIBER_STACK_ENV] {
        let value = std::env::var(var).unwrap_or_else(|_| "(unset)".to_string());
        println!("{}", output::field(var, value));
    }
    Ok(())
}
