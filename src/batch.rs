//! Per-sample RPN inputs and their collation into stacked batch arrays.

use crate::{
    box3d::Box3d,
    calib::Calibration,
    config::Config,
    data::{LabeledPoint, LidarPoint},
    labels::{self, RpnLabels, CLS_FOREGROUND, CLS_IGNORE},
    sampler::{self, Mode, SampledPoints},
};
use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use ndarray::{Array2, Array3, ArrayView, Axis, Dimension, RemoveAxis};
use rand::{prelude::*, rngs::StdRng};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Everything known about a sample besides its points.
#[derive(Debug, Clone)]
pub struct SampleInfo {
    pub sample_id: String,
    pub calib: Calibration,
    /// May contain all-zero padding rows.
    pub gt_boxes3d: Vec<Box3d>,
    pub random_select: bool,
}

impl SampleInfo {
    /// Ground-truth boxes without the zero rows added by batching.
    pub fn valid_gt_boxes3d(&self) -> Vec<Box3d> {
        self.gt_boxes3d
            .iter()
            .filter(|gt_box| !gt_box.is_padding())
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub samples: Vec<SampleInfo>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RpnSample {
    pub points: SampledPoints,
    /// Absent when the RPN is fixed.
    pub labels: Option<RpnLabels>,
}

/// A batch extended with stacked per-point arrays. The leading axis indexes samples.
#[derive(Debug, Clone)]
pub struct DetectorBatch {
    pub batch: Batch,
    /// `[B, N, C]`
    pub pts_input: Array3<f32>,
    /// `[B, N, 3]`
    pub pts_rect: Array3<f32>,
    /// `[B, N, 1]`
    pub pts_features: Array3<f32>,
    /// `[B, N]`
    pub rpn_cls_label: Option<Array2<i32>>,
    /// `[B, N, 7]`
    pub rpn_reg_label: Option<Array3<f32>>,
}

impl DetectorBatch {
    pub fn batch_size(&self) -> usize {
        self.pts_rect.len_of(Axis(0))
    }

    pub fn num_points(&self) -> usize {
        self.pts_rect.len_of(Axis(1))
    }

    /// Collects the points of one sample with their labels. Unlabeled points get background
    /// labels and zero targets.
    pub fn labeled_points(&self, index: usize) -> Vec<LabeledPoint> {
        let rect = self.pts_rect.index_axis(Axis(0), index);
        let features = self.pts_features.index_axis(Axis(0), index);
        let cls = self
            .rpn_cls_label
            .as_ref()
            .map(|cls| cls.index_axis(Axis(0), index));
        let reg = self
            .rpn_reg_label
            .as_ref()
            .map(|reg| reg.index_axis(Axis(0), index));

        (0..self.num_points())
            .map(|pt| {
                let position = nalgebra::Point3::new(rect[[pt, 0]], rect[[pt, 1]], rect[[pt, 2]]);
                let cls_label = cls.as_ref().map_or(0, |cls| cls[pt]);
                let reg_label: [f32; 7] = match &reg {
                    Some(reg) => std::array::from_fn(|col| reg[[pt, col]]),
                    None => [0.0; 7],
                };
                LabeledPoint::new(&position, features[[pt, 0]], cls_label, &reg_label)
            })
            .collect()
    }
}

/// Builds the network inputs, and the training labels unless the RPN is fixed, for sample
/// `idx` of the batch.
pub fn generate_rpn_sample<R>(
    pts_lidar: &[LidarPoint],
    batch: &Batch,
    idx: usize,
    npoints: usize,
    mode: Mode,
    config: &Config,
    rng: &mut R,
) -> Result<RpnSample>
where
    R: Rng + ?Sized,
{
    let info = batch
        .samples
        .get(idx)
        .with_context(|| format!("sample index {idx} is out of a batch of {}", batch.len()))?;

    let points = sampler::transform(
        pts_lidar,
        &info.calib,
        npoints,
        mode,
        info.random_select,
        config,
        rng,
    )
    .with_context(|| format!("unable to sample points for sample '{}'", info.sample_id))?;

    if points.is_empty() {
        warn!("Sample {} has no points in the area scope", info.sample_id);
    }

    if config.rpn.fixed {
        return Ok(RpnSample {
            points,
            labels: None,
        });
    }

    let gt_boxes3d = info.valid_gt_boxes3d();

    let labels =
        labels::generate_rpn_training_labels(&points.pts_rect, &gt_boxes3d, config.gt_extra_width);

    let n_fg = labels.count(CLS_FOREGROUND);
    debug!(
        "Sample {}: {} points, {} boxes, {n_fg} foreground, {} ignored",
        info.sample_id,
        points.len(),
        gt_boxes3d.len(),
        labels.count(CLS_IGNORE),
    );
    if n_fg == 0 && !gt_boxes3d.is_empty() {
        warn!(
            "Sample {} has {} boxes but no foreground points",
            info.sample_id,
            gt_boxes3d.len()
        );
    }

    Ok(RpnSample {
        points,
        labels: Some(labels),
    })
}

/// Generates every sample of the batch and stacks the results.
///
/// Each sample draws from its own generator seeded from `rng` in sample order, so the outcome
/// does not depend on how samples are scheduled across threads.
pub fn get_detector_batch<R>(
    points: &[Vec<LidarPoint>],
    batch: Batch,
    mode: Mode,
    config: &Config,
    rng: &mut R,
) -> Result<DetectorBatch>
where
    R: Rng + ?Sized,
{
    let batch_size = batch.len();
    ensure!(
        points.len() == batch_size,
        "got {} point clouds for a batch of {batch_size} samples",
        points.len()
    );
    ensure!(!batch.is_empty(), "the batch is empty");

    let npoints = config.rpn.num_points.get();
    let seeds: Vec<u64> = (0..batch_size).map(|_| rng.gen()).collect();

    let samples: Vec<RpnSample> = points
        .par_iter()
        .zip(seeds)
        .enumerate()
        .map(|(idx, (pts_lidar, seed))| {
            let mut rng = StdRng::seed_from_u64(seed);
            generate_rpn_sample(pts_lidar, &batch, idx, npoints, mode, config, &mut rng)
        })
        .collect::<Result<_>>()?;

    let counts = samples.iter().map(|sample| sample.points.len()).collect_vec();
    ensure!(
        counts.iter().all_equal(),
        "samples with different point counts {counts:?} cannot be stacked"
    );
    let num_points = counts[0];
    let channels = config.rpn.input_channels();

    let pts_input = stack(&samples, |sample: &RpnSample| {
        let flat: Vec<f32> = sample.points.pts_input.iter().flatten().copied().collect();
        Array2::from_shape_vec((num_points, channels), flat)
    })?;
    let pts_rect = stack(&samples, |sample: &RpnSample| {
        let flat: Vec<f32> = sample
            .points
            .pts_rect
            .iter()
            .flat_map(|p| [p.x, p.y, p.z])
            .collect();
        Array2::from_shape_vec((num_points, 3), flat)
    })?;
    let pts_features = stack(&samples, |sample: &RpnSample| {
        Array2::from_shape_vec((num_points, 1), sample.points.pts_features.clone())
    })?;

    let (rpn_cls_label, rpn_reg_label) = if config.rpn.fixed {
        (None, None)
    } else {
        let sample_labels: Vec<&RpnLabels> = samples
            .iter()
            .zip(&batch.samples)
            .map(|(sample, info)| {
                sample
                    .labels
                    .as_ref()
                    .with_context(|| format!("labels of sample '{}' are missing", info.sample_id))
            })
            .collect::<Result<_>>()?;

        let cls = stack(&sample_labels, |labels: &&RpnLabels| {
            Ok(ndarray::Array1::from(labels.cls_label.clone()))
        })?;
        let reg = stack(&sample_labels, |labels: &&RpnLabels| {
            let flat: Vec<f32> = labels.reg_label.iter().flatten().copied().collect();
            Array2::from_shape_vec((num_points, 7), flat)
        })?;
        (Some(cls), Some(reg))
    };

    Ok(DetectorBatch {
        batch,
        pts_input,
        pts_rect,
        pts_features,
        rpn_cls_label,
        rpn_reg_label,
    })
}

/// Builds one array per item and stacks them along a new leading axis.
fn stack<T, A, D, F>(items: &[T], to_array: F) -> Result<ndarray::Array<A, D::Larger>>
where
    A: Clone,
    D: Dimension,
    D::Larger: RemoveAxis,
    F: Fn(&T) -> Result<ndarray::Array<A, D>, ndarray::ShapeError>,
{
    let arrays = items
        .iter()
        .map(to_array)
        .collect::<Result<Vec<_>, _>>()?;
    let views: Vec<ArrayView<A, D>> = arrays.iter().map(|array| array.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views)?;
    Ok(stacked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{calib::tests::axis_swap_calib, config::Rpn, consts::DEFAULT_CONFIG};
    use std::num::NonZeroUsize;

    fn small_config(fixed: bool) -> Config {
        Config {
            rpn: Rpn {
                num_points: NonZeroUsize::new(64).unwrap(),
                use_intensity: true,
                fixed,
            },
            ..DEFAULT_CONFIG
        }
    }

    /// A 1 m grid of lidar points in front of the sensor, from 5 m to 15 m depth.
    fn grid_cloud() -> Vec<LidarPoint> {
        (5..15)
            .flat_map(|depth| {
                (-3..3).map(move |lateral| LidarPoint {
                    x: depth as f32,
                    y: lateral as f32,
                    z: -0.5,
                    intensity: 0.75,
                })
            })
            .collect()
    }

    /// A box around the grid point at lidar (10, 0, -0.5), which is (0, 0.6, 10) when rectified.
    fn car_box() -> Box3d {
        Box3d {
            x: 0.0,
            y: 1.5,
            z: 10.0,
            h: 1.5,
            w: 1.5,
            l: 1.5,
            ry: 0.0,
        }
    }

    fn batch_of(n: usize, random_select: bool) -> Batch {
        let samples = (0..n)
            .map(|i| SampleInfo {
                sample_id: format!("{i:06}"),
                calib: axis_swap_calib(),
                gt_boxes3d: vec![car_box(), Box3d::from([0.0; 7])],
                random_select,
            })
            .collect();
        Batch { samples }
    }

    #[test]
    fn stacks_samples_along_batch_axis() {
        let config = small_config(false);
        let clouds = vec![grid_cloud(), grid_cloud()[..20].to_vec(), grid_cloud()];
        let mut rng = StdRng::seed_from_u64(11);

        let out = get_detector_batch(&clouds, batch_of(3, false), Mode::Train, &config, &mut rng)
            .unwrap();

        assert_eq!(out.batch_size(), 3);
        assert_eq!(out.num_points(), 64);
        assert_eq!(out.pts_input.shape(), &[3, 64, 4]);
        assert_eq!(out.pts_rect.shape(), &[3, 64, 3]);
        assert_eq!(out.pts_features.shape(), &[3, 64, 1]);
        assert_eq!(out.rpn_cls_label.as_ref().unwrap().shape(), &[3, 64]);
        assert_eq!(out.rpn_reg_label.as_ref().unwrap().shape(), &[3, 64, 7]);

        // Intensity is the last input column as well as the feature.
        assert_eq!(out.pts_input[[1, 5, 3]], out.pts_features[[1, 5, 0]]);
        assert_eq!(out.pts_features[[0, 0, 0]], 0.25);
    }

    #[test]
    fn labels_follow_the_box() {
        let config = small_config(false);
        let clouds = vec![grid_cloud()];
        let mut rng = StdRng::seed_from_u64(5);

        let out = get_detector_batch(&clouds, batch_of(1, false), Mode::Train, &config, &mut rng)
            .unwrap();
        let points = out.labeled_points(0);

        assert_eq!(points.len(), 64);
        // The single grid point inside the box appears at least once after upsampling.
        let fg: Vec<_> = points.iter().filter(|p| p.cls_label == 1).collect();
        assert!(!fg.is_empty());
        for p in fg {
            assert_eq!((p.x, p.z), (0.0, 10.0));
            assert_eq!(p.h, 1.5);
            assert!((p.dy - (0.75 - p.y)).abs() < 1e-6);
        }
        assert!(points
            .iter()
            .filter(|p| p.cls_label != 1)
            .all(|p| p.dx == 0.0 && p.ry == 0.0));
    }

    #[test]
    fn fixed_rpn_skips_labels() {
        let config = small_config(true);
        let clouds = vec![grid_cloud()];
        let mut rng = StdRng::seed_from_u64(5);

        let out = get_detector_batch(&clouds, batch_of(1, false), Mode::Train, &config, &mut rng)
            .unwrap();

        assert!(out.rpn_cls_label.is_none());
        assert!(out.rpn_reg_label.is_none());
        assert!(out.labeled_points(0).iter().all(|p| p.cls_label == 0));
    }

    #[test]
    fn mismatched_batch_size_fails() {
        let config = small_config(false);
        let clouds = vec![grid_cloud()];
        let mut rng = StdRng::seed_from_u64(5);

        assert!(
            get_detector_batch(&clouds, batch_of(2, false), Mode::Train, &config, &mut rng)
                .is_err()
        );
    }

    #[test]
    fn unsampled_clouds_of_different_sizes_fail_to_stack() {
        let config = small_config(false);
        let clouds = vec![grid_cloud(), grid_cloud()[..10].to_vec()];
        let mut rng = StdRng::seed_from_u64(5);

        let result = get_detector_batch(&clouds, batch_of(2, false), Mode::Test, &config, &mut rng);
        assert!(result.is_err());

        // Random selection brings both to the configured size.
        let out = get_detector_batch(&clouds, batch_of(2, true), Mode::Test, &config, &mut rng)
            .unwrap();
        assert_eq!(out.num_points(), 64);
    }

    #[test]
    fn same_seed_reproduces_batch() {
        let config = small_config(false);
        let clouds = vec![grid_cloud(), grid_cloud()];

        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            get_detector_batch(&clouds, batch_of(2, false), Mode::Train, &config, &mut rng)
                .unwrap()
                .pts_rect
        };
        assert_eq!(run(3), run(3));
    }

    #[test]
    fn padding_boxes_are_dropped() {
        let batch = batch_of(1, false);
        let info = &batch.samples[0];

        assert_eq!(info.gt_boxes3d.len(), 2);
        assert_eq!(info.valid_gt_boxes3d(), vec![car_box()]);

        let mut only_padding = info.clone();
        only_padding.gt_boxes3d = vec![Box3d::from([0.0; 7]); 3];
        assert!(only_padding.valid_gt_boxes3d().is_empty());
    }

    #[test]
    fn sample_index_out_of_range() {
        let config = small_config(false);
        let mut rng = StdRng::seed_from_u64(5);

        let result = generate_rpn_sample(
            &grid_cloud(),
            &batch_of(1, false),
            1,
            64,
            Mode::Train,
            &config,
            &mut rng,
        );
        assert!(result.is_err());
    }
}
