use crate::{
    batch::{Batch, SampleInfo},
    box3d::Box3d,
    calib::CalibSource,
    data::LidarPoint,
};
use anyhow::{Context, Result};
use pcd_rs::Reader;
use rayon::prelude::*;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// The list of samples to process, read from a JSON5 file.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub samples: Vec<SampleEntry>,

    /// Directory that relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleEntry {
    pub sample_id: String,
    /// Path to a .pcd file with x, y, z and intensity fields.
    pub points: PathBuf,
    pub calib: CalibSource,
    #[serde(default)]
    pub gt_boxes3d: Vec<Box3d>,
    #[serde(default)]
    pub random_select: bool,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read manifest '{}'", path.display()))?;
        let mut manifest: Manifest = json5::from_str(&text)
            .with_context(|| format!("unable to parse manifest '{}'", path.display()))?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(manifest)
    }

    /// Loads the point clouds and calibrations of `entries` in parallel.
    pub fn load_batch(&self, entries: &[SampleEntry]) -> Result<(Vec<Vec<LidarPoint>>, Batch)> {
        let loaded: Vec<(Vec<LidarPoint>, SampleInfo)> = entries
            .par_iter()
            .map(|entry| self.load_sample(entry))
            .collect::<Result<_>>()?;
        let (points, samples) = loaded.into_iter().unzip();
        Ok((points, Batch { samples }))
    }

    fn load_sample(&self, entry: &SampleEntry) -> Result<(Vec<LidarPoint>, SampleInfo)> {
        let SampleEntry {
            sample_id,
            points,
            calib,
            gt_boxes3d,
            random_select,
        } = entry;

        let points = load_points(&self.base_dir.join(points))?;
        let calib = calib
            .load(&self.base_dir)
            .with_context(|| format!("unable to load calibration of sample '{sample_id}'"))?;

        let info = SampleInfo {
            sample_id: sample_id.clone(),
            calib,
            gt_boxes3d: gt_boxes3d.clone(),
            random_select: *random_select,
        };
        Ok((points, info))
    }
}

pub fn load_points(path: &Path) -> Result<Vec<LidarPoint>> {
    let reader = Reader::open(path)
        .with_context(|| format!("unable to open point cloud '{}'", path.display()))?;
    let points: Vec<LidarPoint> = reader
        .collect::<Result<_, _>>()
        .with_context(|| format!("unable to read point cloud '{}'", path.display()))?;
    Ok(points)
}
