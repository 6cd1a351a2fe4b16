use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, num::NonZeroUsize, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpn: Rpn,
    pub pc_reduce_by_range: bool,
    pub pc_area_scope: AreaScope,
    /// Points with depth below this value count as near points.
    pub near_depth_m: f32,
    /// Margin added around ground-truth boxes. Points inside the margin are ignored.
    pub gt_extra_width: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rpn {
    pub num_points: NonZeroUsize,
    pub use_intensity: bool,
    /// The RPN is frozen and needs no training labels.
    pub fixed: bool,
}

impl Rpn {
    /// Number of columns in the network input, `[x, y, z]` plus intensity if enabled.
    pub fn input_channels(&self) -> usize {
        if self.use_intensity {
            4
        } else {
            3
        }
    }
}

/// Inclusive `[min, max]` ranges for x, y and z in the rectified frame.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AreaScope(pub [[f32; 2]; 3]);

impl AreaScope {
    pub fn contains(&self, x: f32, y: f32, z: f32) -> bool {
        let [[x_min, x_max], [y_min, y_max], [z_min, z_max]] = self.0;
        (x_min..=x_max).contains(&x) && (y_min..=y_max).contains(&y) && (z_min..=z_max).contains(&z)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("unable to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}
