use anyhow::{bail, ensure, Context, Result};
use nalgebra::{Matrix3, Matrix3x4, Point3};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

/// Maps lidar coordinates into the rectified reference camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub r0_rect: Matrix3<f32>,
    pub velo_to_cam: Matrix3x4<f32>,
}

impl Calibration {
    pub fn new(r0_rect: [f32; 9], velo_to_cam: [f32; 12]) -> Self {
        Self {
            r0_rect: Matrix3::from_row_slice(&r0_rect),
            velo_to_cam: Matrix3x4::from_row_slice(&velo_to_cam),
        }
    }

    /// Parses the KITTI calibration text format, one `KEY: v0 v1 ...` entry per line.
    pub fn from_kitti_str(text: &str) -> Result<Self> {
        let entries: HashMap<&str, &str> = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, values)| (key.trim(), values))
            .collect();

        let parse = |key: &str, expect_len: usize| -> Result<Vec<f32>> {
            let Some(values) = entries.get(key) else {
                bail!("calibration entry '{key}' is missing");
            };
            let values: Vec<f32> = values
                .split_whitespace()
                .map(|v| v.parse())
                .collect::<Result<_, _>>()
                .with_context(|| format!("calibration entry '{key}' is not numeric"))?;
            ensure!(
                values.len() == expect_len,
                "calibration entry '{key}' has {} values, expect {expect_len}",
                values.len()
            );
            Ok(values)
        };

        let r0_rect = parse("R0_rect", 9)?;
        let velo_to_cam = parse("Tr_velo_to_cam", 12)?;

        Ok(Self {
            r0_rect: Matrix3::from_row_slice(&r0_rect),
            velo_to_cam: Matrix3x4::from_row_slice(&velo_to_cam),
        })
    }

    pub fn from_kitti_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read calibration file '{}'", path.display()))?;
        Self::from_kitti_str(&text)
            .with_context(|| format!("invalid calibration file '{}'", path.display()))
    }

    pub fn lidar_to_rect_point(&self, point: &Point3<f32>) -> Point3<f32> {
        let cam = self.velo_to_cam * point.to_homogeneous();
        Point3::from(self.r0_rect * cam)
    }

    pub fn lidar_to_rect(&self, points: &[Point3<f32>]) -> Vec<Point3<f32>> {
        points
            .iter()
            .map(|point| self.lidar_to_rect_point(point))
            .collect()
    }
}

/// Calibration as written in a manifest: either inline matrices or a KITTI calibration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CalibSource {
    Inline {
        #[serde(rename = "R0_rect")]
        r0_rect: [f32; 9],
        #[serde(rename = "Tr_velo_to_cam")]
        velo_to_cam: [f32; 12],
    },
    File(std::path::PathBuf),
}

impl CalibSource {
    /// Resolves the calibration. Relative file paths are looked up under `base_dir`.
    pub fn load(&self, base_dir: &Path) -> Result<Calibration> {
        let calib = match self {
            Self::Inline {
                r0_rect,
                velo_to_cam,
            } => Calibration::new(*r0_rect, *velo_to_cam),
            Self::File(path) => Calibration::from_kitti_file(&base_dir.join(path))?,
        };
        Ok(calib)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Lidar (x forward, y left, z up) to camera (x right, y down, z forward) with a 0.1 m offset.
    pub(crate) fn axis_swap_calib() -> Calibration {
        Calibration::new(
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            [
                0.0, -1.0, 0.0, 0.0, //
                0.0, 0.0, -1.0, 0.1, //
                1.0, 0.0, 0.0, 0.0,
            ],
        )
    }

    #[test]
    fn lidar_to_rect_swaps_axes() {
        let calib = axis_swap_calib();
        let rect = calib.lidar_to_rect(&[Point3::new(10.0, 2.0, -1.0)]);

        assert_relative_eq!(rect[0], Point3::new(-2.0, 1.1, 10.0));
    }

    #[test]
    fn rect_rotation_is_applied_after_velo_to_cam() {
        let calib = Calibration {
            r0_rect: Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0),
            ..axis_swap_calib()
        };
        let rect = calib.lidar_to_rect_point(&Point3::new(10.0, 2.0, -1.0));

        assert_relative_eq!(rect, Point3::new(-1.1, -2.0, 10.0));
    }

    #[test]
    fn parse_kitti_text() {
        let text = "\
P0: 7.0 0.0 6.0 0.0 0.0 7.0 1.8 0.0 0.0 0.0 1.0 0.0
R0_rect: 1 0 0 0 1 0 0 0 1
Tr_velo_to_cam: 0 -1 0 0 0 0 -1 0.1 1 0 0 0
Tr_imu_to_velo: 1 0 0 0 0 1 0 0 0 0 1 0
";
        let calib = Calibration::from_kitti_str(text).unwrap();
        assert_eq!(calib, axis_swap_calib());
    }

    #[test]
    fn reject_incomplete_kitti_text() {
        assert!(Calibration::from_kitti_str("R0_rect: 1 0 0 0 1 0 0 0 1\n").is_err());
        assert!(Calibration::from_kitti_str(
            "R0_rect: 1 0 0 0 1 0 0 0\nTr_velo_to_cam: 0 -1 0 0 0 0 -1 0.1 1 0 0 0\n"
        )
        .is_err());
    }

    #[test]
    fn inline_source_from_json5() {
        let source: CalibSource = json5::from_str(
            "{ R0_rect: [1, 0, 0, 0, 1, 0, 0, 0, 1], Tr_velo_to_cam: [0, -1, 0, 0, 0, 0, -1, 0.1, 1, 0, 0, 0] }",
        )
        .unwrap();
        let calib = source.load(Path::new(".")).unwrap();
        assert_eq!(calib, axis_swap_calib());

        let source: CalibSource = json5::from_str("'calib/000001.txt'").unwrap();
        assert!(matches!(source, CalibSource::File(_)));
    }
}
