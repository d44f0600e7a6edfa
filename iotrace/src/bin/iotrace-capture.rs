//! # iotrace-capture - Frame Collector
//!
//! Creates the fanout FIFO, waits for preloaded processes to connect and
//! prints one line per frame until every writer has gone away (or Ctrl-C).
//! The FIFO is removed on the way out.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use iotrace::capture::{display_summary, spawn_fanout_reader, FrameProcessor, StreamEvent};
use iotrace::cli::CaptureArgs;
use iotrace::domain::CaptureError;
use iotrace::preflight::check_fanout_parent;
use iotrace_common::transport;
use log::{debug, info};
use std::fs::File;
use std::io::BufWriter;
use std::time::{Duration, Instant};
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
    if msg.contains("permission denied") {
        EXIT_NOPERM
    } else if msg.contains("is not a directory") || msg.contains("cannot be accessed") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = CaptureArgs::parse();
    let fanout = args.fanout.clone();

    check_fanout_parent(&fanout)?;
    transport::ensure_fifo(&fanout)
        .map_err(|source| CaptureError::FanoutCreate { path: fanout.clone(), source })?;

    let raw_output = args
        .output
        .as_ref()
        .map(|path| {
            File::create(path)
                .map(BufWriter::new)
                .with_context(|| format!("Failed to create output file {}", path.display()))
        })
        .transpose()?;
    let mut processor = FrameProcessor::new(args.quiet, std::io::stdout(), raw_output);

    // Must be installed before the FIFO is announced
    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    println!("Listening on {}", fanout.display());
    let (events, _reader) = spawn_fanout_reader(fanout.clone());

    let started = Instant::now();
    let mut exit_reason = "interrupted";
    let mut failure = None;

    'capture: loop {
        // Process all available frames
        loop {
            match events.try_recv() {
                Ok(StreamEvent::Frame(frame)) => {
                    if let Err(e) = processor.process_frame(&frame) {
                        failure = Some(e);
                        exit_reason = "failed";
                        break 'capture;
                    }
                }
                Ok(StreamEvent::End) | Err(TryRecvError::Disconnected) => {
                    exit_reason = "stream closed";
                    break 'capture;
                }
                Ok(StreamEvent::Failed(e)) => {
                    failure = Some(e);
                    exit_reason = "failed";
                    break 'capture;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = interrupt.recv() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = terminate.recv() => {
                info!("terminated, shutting down");
                break;
            }
        }
    }

    // The reader thread may still be blocked opening the FIFO; it is left to
    // die with the process.
    transport::remove_fifo(&fanout)
        .with_context(|| format!("Failed to remove fanout {}", fanout.display()))?;
    debug!("removed {}", fanout.display());

    processor.finish()?;
    display_summary(exit_reason, started.elapsed(), &processor.stats);

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
