//! # iotrace-fuse - Filesystem Shim
//!
//! Mounts a passthrough view of `FF_PHYS_PATH` and appends one
//! `"{offset} {count}"` line per read to a log under `FF_LOG_PATH`.
//! Runs until Ctrl-C or SIGTERM, then unmounts.

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use iotrace::cli::FuseArgs;
use iotrace::domain::ShimError;
use iotrace::preflight::run_fuse_preflight;
use iotrace::shim::{Passthrough, PathMapper, ShimFs, LOG_PATH_ENV, PHYS_PATH_ENV};
use log::info;
use tokio::signal::unix::{signal, SignalKind};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("operation not permitted") {
        EXIT_NOPERM
    } else if msg.contains("missing required setting") || msg.contains("must be absolute") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = FuseArgs::parse();

    let phys_root = args.phys_path.clone().ok_or(ShimError::MissingSetting(PHYS_PATH_ENV))?;
    let log_root = args.log_path.clone().ok_or(ShimError::MissingSetting(LOG_PATH_ENV))?;
    let paths = PathMapper::new(phys_root, log_root)?;

    run_fuse_preflight(&paths, &args.mountpoint)?;

    let mut options = vec![
        MountOption::FSName("iotrace".to_string()),
        MountOption::Subtype("iotrace".to_string()),
    ];
    if args.allow_other {
        options.push(MountOption::AllowOther);
    }

    println!("mirroring {} at {}", paths.phys_root().display(), args.mountpoint.display());
    println!("access logs: {}", paths.log_root().display());

    let filesystem = ShimFs::new(Passthrough::new(paths));
    let session = fuser::spawn_mount2(filesystem, &args.mountpoint, &options).map_err(|source| {
        ShimError::MountFailed { mountpoint: args.mountpoint.clone(), source }
    })?;

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to wait for Ctrl-C")?,
        _ = terminate.recv() => {}
    }

    info!("unmounting {}", args.mountpoint.display());
    drop(session);
    Ok(())
}
