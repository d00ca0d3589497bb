//! Command line frontend for the boot configuration synthesis engine.

use anyhow::Result;
use clap::{Parser, Subcommand};

use bootsynth_lib::kargs::KernelArguments;
use bootsynth_lib::kernel_cmdline::Cmdline;
use bootsynth_lib::platform::Platform;
use bootsynth_lib::storage::StorageGraph;

#[derive(Debug, Parser)]
#[command(name = "bootsynth", version, about = "Boot configuration synthesis")]
struct Opt {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Validate the boot device selection for this machine
    Check,
    /// Print the kernel arguments new boot entries would carry
    Kargs {
        /// Extra arguments to append
        #[arg(long)]
        append: Vec<String>,
    },
    /// Print the partitions this architecture requires
    Partitioning,
}

fn detect() -> Result<(Platform, StorageGraph)> {
    let platform = Platform::detect()?;
    let devices = bootsynth_blockdev::list_all()?;
    let graph = StorageGraph::from_lsblk(&devices)?;
    Ok((platform, graph))
}

fn check() -> Result<()> {
    let (platform, graph) = detect()?;
    let boot = platform.boot_device(&graph);
    if let Some(dev) = boot {
        println!("boot device: {}", dev.path);
    }
    let errors = platform.check_boot_request(&graph, boot);
    if errors.is_empty() {
        println!("ok");
        return Ok(());
    }
    for e in &errors {
        eprintln!("error: {e}");
    }
    anyhow::bail!("boot device validation failed");
}

fn kargs(append: &[String]) -> Result<()> {
    let (platform, graph) = detect()?;
    let cmdline = Cmdline::from_proc()?;
    let args = KernelArguments::build(&platform, &graph, &cmdline, &[], None, append);
    println!("{args}");
    Ok(())
}

fn partitioning() -> Result<()> {
    let (platform, _) = detect()?;
    for spec in platform.default_partitioning() {
        let mountpoint = spec.mountpoint.as_deref().unwrap_or("-");
        let grow = if spec.grow { " (grow)" } else { "" };
        println!(
            "{mountpoint}\t{}\t{} MiB{grow}",
            spec.fstype, spec.size_mib
        );
    }
    Ok(())
}

fn run() -> Result<()> {
    bootsynth_utils::initialize_tracing();
    let opt = Opt::parse();
    match opt.cmd {
        Cmd::Check => check(),
        Cmd::Kargs { append } => kargs(&append),
        Cmd::Partitioning => partitioning(),
    }
}

fn main() {
    if let Err(e) = run() {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}
