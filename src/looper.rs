use crate::{
    batch, config::Config, labels::CLS_FOREGROUND, manifest::Manifest, message::SampleMessage,
    sampler::Mode,
};
use anyhow::Result;
use itertools::Itertools;
use rand::Rng;
use std::{
    num::NonZeroUsize,
    path::Path,
    sync::atomic::{AtomicBool, Ordering::*},
    time::{Duration, Instant},
};
use tracing::{info, warn};

/// Per-run totals reported when the looper stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub n_batches: usize,
    pub n_samples: usize,
    pub n_foreground: usize,
}

/// The looper runs through the manifest batch by batch and forwards finished samples to the
/// writer.
///
/// It stops early when termination signal is received.
#[allow(clippy::too_many_arguments)]
pub fn run_looper<R>(
    manifest: &Manifest,
    config: &Config,
    mode: Mode,
    batch_size: NonZeroUsize,
    output_dir: &Path,
    rng: &mut R,
    sample_tx: &flume::Sender<SampleMessage>,
    is_terminated: &AtomicBool,
) -> Result<Summary>
where
    R: Rng + ?Sized,
{
    let mut summary = Summary::default();
    let mut since = Instant::now();

    for (batch_id, entries) in manifest.samples.chunks(batch_size.get()).enumerate() {
        // Check termination signal
        if is_terminated.load(SeqCst) {
            warn!("User interrupted");
            break;
        }

        // Print # of processed batches every 10 secs
        if since.elapsed() >= Duration::from_secs(10) {
            info!("Processed {} batches", batch_id);
            since = Instant::now();
        }

        let (points, batch) = manifest.load_batch(entries)?;
        let detector_batch = batch::get_detector_batch(&points, batch, mode, config, rng)?;

        let n_foreground = detector_batch
            .rpn_cls_label
            .as_ref()
            .map_or(0, |cls| cls.iter().filter(|&&l| l == CLS_FOREGROUND).count());
        info!(
            "Batch {batch_id}: samples [{}], input {:?}, {n_foreground} foreground points",
            detector_batch
                .batch
                .samples
                .iter()
                .map(|info| &info.sample_id)
                .join(", "),
            detector_batch.pts_input.dim(),
        );

        for (index, info) in detector_batch.batch.samples.iter().enumerate() {
            let msg = SampleMessage {
                batch_id,
                sample_id: info.sample_id.clone(),
                points: detector_batch.labeled_points(index),
                output_path: output_dir.join(format!("{}.pcd", info.sample_id)),
            };

            if sample_tx.send(msg).is_err() {
                warn!("The writer is gone. Stop processing.");
                return Ok(summary);
            }
        }

        summary.n_batches += 1;
        summary.n_samples += detector_batch.batch_size();
        summary.n_foreground += n_foreground;
    }

    Ok(summary)
}
