//! Per-point training targets for the region proposal network.

use crate::box3d::{in_hull, Box3d};
use nalgebra::Point3;

pub const CLS_IGNORE: i32 = -1;
pub const CLS_BACKGROUND: i32 = 0;
pub const CLS_FOREGROUND: i32 = 1;

/// Classification labels and regression targets, one entry per point.
///
/// Regression targets are `[dx, dy, dz, h, w, l, ry]` where `(dx, dy, dz)` is the offset from
/// the point to the box center. Only foreground points carry non-zero targets.
#[derive(Debug, Clone, PartialEq)]
pub struct RpnLabels {
    pub cls_label: Vec<i32>,
    pub reg_label: Vec<[f32; 7]>,
}

impl RpnLabels {
    pub fn count(&self, label: i32) -> usize {
        self.cls_label.iter().filter(|&&l| l == label).count()
    }
}

/// Labels points inside a box as foreground and points in the `extra_width` margin around it
/// as ignored. Boxes are applied in order, so later boxes win on overlapping points.
pub fn generate_rpn_training_labels(
    pts_rect: &[Point3<f32>],
    gt_boxes3d: &[Box3d],
    extra_width: f32,
) -> RpnLabels {
    let mut cls_label = vec![CLS_BACKGROUND; pts_rect.len()];
    let mut reg_label = vec![[0f32; 7]; pts_rect.len()];

    for gt_box in gt_boxes3d {
        let fg_flag = in_hull(pts_rect, &gt_box.corners());
        let enlarge_flag = in_hull(pts_rect, &gt_box.enlarged(extra_width).corners());
        let center = gt_box.true_center();

        let iter = fg_flag
            .iter()
            .zip(&enlarge_flag)
            .zip(pts_rect)
            .zip(cls_label.iter_mut().zip(reg_label.iter_mut()));

        for (((&is_fg, &is_enlarged), point), (cls, reg)) in iter {
            if is_fg {
                *cls = CLS_FOREGROUND;
                let offset = center - point;
                *reg = [
                    offset.x, offset.y, offset.z, gt_box.h, gt_box.w, gt_box.l, gt_box.ry,
                ];
            }

            // Points near the box surface are ambiguous
            if is_fg != is_enlarged {
                *cls = CLS_IGNORE;
            }
        }
    }

    RpnLabels {
        cls_label,
        reg_label,
    }
}
