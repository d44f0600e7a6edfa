use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the LD_PRELOAD interceptor library
    BuildPreload {
        #[arg(long)]
        release: bool,
    },
    /// Build the interceptor, then run COMMAND with it preloaded
    Trace {
        /// Basename to trace (default: every opened file)
        #[arg(long)]
        filename: Option<String>,
        /// FIFO the capture process is listening on
        #[arg(long)]
        fanout: Option<PathBuf>,
        #[arg(long)]
        release: bool,
        #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildPreload { release } => {
            let lib = build_preload(release)?;
            println!("✓ preload library built successfully");
            println!("  Path: {}", lib.display());
        }
        Cmd::Trace { filename, fanout, release, command } => {
            let lib = build_preload(release)?;
            trace(&lib, filename.as_deref(), fanout, &command)?;
        }
    }

    Ok(())
}

fn build_preload(release: bool) -> Result<PathBuf> {
    let mut cmd = Command::new("cargo");
    cmd.arg("build").arg("--package").arg("iotrace-preload");
    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("Failed to build preload library")?;
    if !status.success() {
        anyhow::bail!("Failed to build preload library");
    }

    let profile = if release { "release" } else { "debug" };
    Ok(workspace_root().join("target").join(profile).join("libiotrace_preload.so"))
}

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
}

fn trace(
    lib: &Path,
    filename: Option<&str>,
    fanout: Option<PathBuf>,
    command: &[String],
) -> Result<()> {
    let (program, rest) = command.split_first().context("Missing COMMAND")?;

    let mut cmd = Command::new(program);
    cmd.args(rest).env("LD_PRELOAD", lib);
    if let Some(filename) = filename {
        cmd.env("IOTRACE_FILENAME", filename);
    }
    if let Some(fanout) = fanout {
        cmd.env("IOTRACE_FANOUT", fanout);
    }

    let status = cmd.status().with_context(|| format!("Failed to run {program}"))?;
    if !status.success() {
        anyhow::bail!("{program} exited with {status}");
    }
    Ok(())
}
