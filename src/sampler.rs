//! Brings a lidar cloud into the rectified frame and resamples it to a fixed size.

use crate::{calib::Calibration, config::Config, data::LidarPoint};
use anyhow::{ensure, Result};
use clap::ValueEnum;
use nalgebra::Point3;
use rand::prelude::*;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Train,
    Val,
    Test,
}

/// The network inputs of one sample.
#[derive(Debug, Clone)]
pub struct SampledPoints {
    /// Per-point input rows, `[x, y, z]` or `[x, y, z, intensity]`.
    pub pts_input: Vec<Vec<f32>>,
    pub pts_rect: Vec<Point3<f32>>,
    /// The shifted intensity of each point.
    pub pts_features: Vec<f32>,
}

impl SampledPoints {
    pub fn len(&self) -> usize {
        self.pts_rect.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pts_rect.is_empty()
    }
}

/// Transforms the cloud into the rectified frame, filters it by range and samples exactly
/// `npoints` points when in training mode or when `random_select` is set.
pub fn transform<R>(
    points: &[LidarPoint],
    calib: &Calibration,
    npoints: usize,
    mode: Mode,
    random_select: bool,
    config: &Config,
    rng: &mut R,
) -> Result<SampledPoints>
where
    R: Rng + ?Sized,
{
    let positions: Vec<_> = points.iter().map(LidarPoint::position).collect();
    let (pts_rect, pts_intensity): (Vec<_>, Vec<_>) = calib
        .lidar_to_rect(&positions)
        .into_iter()
        .zip(points.iter().map(|point| point.intensity))
        .filter(|(rect, _)| {
            !config.pc_reduce_by_range || config.pc_area_scope.contains(rect.x, rect.y, rect.z)
        })
        .unzip();

    let choice: Vec<usize> = if mode == Mode::Train || random_select {
        ensure!(
            !pts_rect.is_empty(),
            "no points are left in the area scope to sample from"
        );
        ensure!(npoints > 0, "the number of points to sample must be positive");

        if npoints < pts_rect.len() {
            downsample_choice(&pts_rect, npoints, config.near_depth_m, rng)
        } else {
            upsample_choice(pts_rect.len(), npoints, rng)
        }
    } else {
        (0..pts_rect.len()).collect()
    };

    // Translate intensity to [-0.5, 0.5]
    let pts_features: Vec<f32> = choice.iter().map(|&idx| pts_intensity[idx] - 0.5).collect();
    let pts_rect: Vec<Point3<f32>> = choice.iter().map(|&idx| pts_rect[idx]).collect();

    let pts_input = pts_rect
        .iter()
        .zip(&pts_features)
        .map(|(p, &feature)| {
            if config.rpn.use_intensity {
                vec![p.x, p.y, p.z, feature]
            } else {
                vec![p.x, p.y, p.z]
            }
        })
        .collect();

    Ok(SampledPoints {
        pts_input,
        pts_rect,
        pts_features,
    })
}

/// Keeps every far point and fills the remaining budget with random near points.
fn downsample_choice<R>(
    pts_rect: &[Point3<f32>],
    npoints: usize,
    near_depth: f32,
    rng: &mut R,
) -> Vec<usize>
where
    R: Rng + ?Sized,
{
    let (near_idxs, mut far_idxs): (Vec<usize>, Vec<usize>) =
        (0..pts_rect.len()).partition(|&idx| pts_rect[idx].z < near_depth);

    let mut choice = if far_idxs.len() >= npoints {
        debug!(
            "{} far points exceed the budget of {npoints} points",
            far_idxs.len()
        );
        let (far_choice, _) = far_idxs.partial_shuffle(rng, npoints);
        far_choice.to_vec()
    } else {
        let n_near = npoints - far_idxs.len();
        let mut choice: Vec<usize> = near_idxs.choose_multiple(rng, n_near).copied().collect();
        choice.append(&mut far_idxs);
        choice
    };

    choice.shuffle(rng);
    choice
}

/// Repeats all point indices and tops them up with distinct random indices.
fn upsample_choice<R>(n_points: usize, npoints: usize, rng: &mut R) -> Vec<usize>
where
    R: Rng + ?Sized,
{
    let times = npoints / n_points;
    let rem = npoints % n_points;

    let mut choice: Vec<usize> = (0..times).flat_map(|_| 0..n_points).collect();
    choice.extend(rand::seq::index::sample(rng, n_points, rem));
    choice.shuffle(rng);
    choice
}
