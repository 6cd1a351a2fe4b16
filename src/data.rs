use nalgebra::Point3;
use pcd_rs::{PcdDeserialize, PcdSerialize};

/// The point type read from an input .pcd file.
#[derive(Debug, Clone, Copy, PartialEq, PcdDeserialize)]
#[cfg_attr(test, derive(pcd_rs::PcdSerialize))]
pub struct LidarPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

impl LidarPoint {
    pub fn position(&self) -> Point3<f32> {
        Point3::new(self.x, self.y, self.z)
    }
}

/// The point type that is written to the output .pcd file.
///
/// The position is in the rectified frame and `intensity` is shifted into `[-0.5, 0.5]`.
#[derive(Debug, Clone, Copy, PartialEq, PcdSerialize, PcdDeserialize)]
pub struct LabeledPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
    pub cls_label: i32,
    pub dx: f32,
    pub dy: f32,
    pub dz: f32,
    pub h: f32,
    pub w: f32,
    pub l: f32,
    pub ry: f32,
}

impl LabeledPoint {
    pub fn new(rect: &Point3<f32>, feature: f32, cls_label: i32, reg_label: &[f32; 7]) -> Self {
        let [dx, dy, dz, h, w, l, ry] = *reg_label;

        Self {
            x: rect.x,
            y: rect.y,
            z: rect.z,
            intensity: feature,
            cls_label,
            dx,
            dy,
            dz,
            h,
            w,
            l,
            ry,
        }
    }
}
