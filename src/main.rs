mod batch;
mod box3d;
mod calib;
mod config;
mod consts;
mod data;
mod labels;
mod looper;
mod manifest;
mod message;
mod sampler;
mod writer;

use crate::{config::Config, manifest::Manifest, sampler::Mode};
use anyhow::{Context, Result};
use clap::Parser;
use rand::{prelude::*, rngs::StdRng};
use std::{
    fs,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering::*},
        Arc,
    },
    thread,
};
use tracing::{info, warn};

#[derive(Parser)]
struct Opts {
    /// JSON5 file listing the samples to process.
    #[clap(long)]
    pub manifest: PathBuf,
    /// JSON5 configuration. Built-in defaults are used if absent.
    #[clap(long)]
    pub config: Option<PathBuf>,
    #[clap(short, long)]
    pub output_dir: PathBuf,
    #[clap(long, default_value = "4")]
    pub batch_size: NonZeroUsize,
    #[clap(long, value_enum, default_value = "train")]
    pub mode: Mode,
    /// Seed for point sampling. A random seed is drawn if absent.
    #[clap(long)]
    pub seed: Option<u64>,
}

fn main() -> Result<()> {
    // Enable logging
    tracing_subscriber::fmt::init();

    // Parse command line arguments
    let opts = Opts::parse();

    // Load config and manifest
    let config = match &opts.config {
        Some(path) => Config::load(path)?,
        None => consts::DEFAULT_CONFIG,
    };
    let manifest = Manifest::load(&opts.manifest)?;
    if manifest.samples.is_empty() {
        warn!("The manifest lists no samples");
    }

    // Prepare files and dirs
    fs::create_dir_all(&opts.output_dir).with_context(|| {
        format!(
            "unable to create output directory '{}'",
            opts.output_dir.display()
        )
    })?;

    // Create random generator
    let seed = opts.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!("Sampling with seed {seed}");
    let mut rng = StdRng::seed_from_u64(seed);

    // Stop after the current batch on Ctrl-C
    let is_terminated = Arc::new(AtomicBool::new(false));
    {
        let is_terminated = is_terminated.clone();
        ctrlc::set_handler(move || is_terminated.store(true, SeqCst))?;
    }

    // Start sample writer
    let (sample_tx, sample_rx) = flume::bounded(opts.batch_size.get() * 2);
    let writer = thread::spawn(move || writer::run_writer(sample_rx));

    let result = looper::run_looper(
        &manifest,
        &config,
        opts.mode,
        opts.batch_size,
        &opts.output_dir,
        &mut rng,
        &sample_tx,
        &is_terminated,
    );

    // Let the writer drain the remaining samples
    drop(sample_tx);
    let write_result = match writer.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("the writer thread panicked"),
    };

    let summary = result?;
    write_result?;

    info!(
        "Finished {} batches with {} samples and {} foreground points",
        summary.n_batches, summary.n_samples, summary.n_foreground
    );

    Ok(())
}
