//! Ground-truth boxes in the rectified camera frame and point-in-hull tests.
//!
//! Boxes follow the KITTI convention: y points down and the box location is the center of its
//! bottom face, so the box spans `[y - h, y]` along y.

use nalgebra::{Point3, Vector3};
use serde::Deserialize;

/// Tolerance for points lying on a face of the hull.
const HULL_EPS: f32 = 1e-5;

/// Face indices into the corner array returned by [Box3d::corners].
const FACES: [[usize; 4]; 6] = [
    [0, 1, 2, 3],
    [4, 5, 6, 7],
    [0, 1, 5, 4],
    [1, 2, 6, 5],
    [2, 3, 7, 6],
    [3, 0, 4, 7],
];

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "[f32; 7]")]
pub struct Box3d {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub h: f32,
    pub w: f32,
    pub l: f32,
    pub ry: f32,
}

impl From<[f32; 7]> for Box3d {
    fn from([x, y, z, h, w, l, ry]: [f32; 7]) -> Self {
        Self {
            x,
            y,
            z,
            h,
            w,
            l,
            ry,
        }
    }
}

impl Box3d {
    /// Zero rows are padding inserted when boxes of several samples are batched together.
    pub fn is_padding(&self) -> bool {
        let Self {
            x,
            y,
            z,
            h,
            w,
            l,
            ry,
        } = *self;
        [x, y, z, h, w, l, ry].iter().all(|&v| v == 0.0)
    }

    /// The geometric center. The stored y is the bottom face.
    pub fn true_center(&self) -> Point3<f32> {
        Point3::new(self.x, self.y - self.h / 2.0, self.z)
    }

    /// Grows every side by `extra_width`, keeping the true center in place.
    pub fn enlarged(&self, extra_width: f32) -> Self {
        Self {
            y: self.y + extra_width,
            h: self.h + extra_width * 2.0,
            w: self.w + extra_width * 2.0,
            l: self.l + extra_width * 2.0,
            ..*self
        }
    }

    /// The 8 corners. Corners 0..4 lie on the bottom face and 4..8 on the top face.
    pub fn corners(&self) -> [Point3<f32>; 8] {
        let Self {
            x,
            y,
            z,
            h,
            w,
            l,
            ry,
        } = *self;
        let (hl, hw) = (l / 2.0, w / 2.0);
        let xs = [hl, hl, -hl, -hl, hl, hl, -hl, -hl];
        let ys = [0.0, 0.0, 0.0, 0.0, -h, -h, -h, -h];
        let zs = [hw, -hw, -hw, hw, hw, -hw, -hw, hw];
        let (sin, cos) = ry.sin_cos();

        std::array::from_fn(|i| {
            let (cx, cy, cz) = (xs[i], ys[i], zs[i]);
            Point3::new(
                cx * cos + cz * sin + x,
                cy + y,
                -cx * sin + cz * cos + z,
            )
        })
    }
}

/// A convex hexahedron described by its outward face planes.
#[derive(Debug, Clone)]
pub struct Hull {
    /// `(outward normal, point on face)` pairs. Empty when the hull has no volume.
    planes: Vec<(Vector3<f32>, Point3<f32>)>,
}

impl Hull {
    pub fn from_corners(corners: &[Point3<f32>; 8]) -> Self {
        let centroid = corners
            .iter()
            .fold(Vector3::zeros(), |sum, p| sum + p.coords)
            / 8.0;
        let centroid = Point3::from(centroid);

        let mut planes = Vec::with_capacity(FACES.len());

        for [a, b, c, d] in FACES {
            let origin = corners[a];

            // Normal from the cross product of the face diagonals
            let normal = (corners[c] - origin).cross(&(corners[d] - corners[b]));
            let Some(mut normal) = normal.try_normalize(HULL_EPS) else {
                return Self { planes: vec![] };
            };

            let offset = normal.dot(&(centroid - origin));
            if offset.abs() <= HULL_EPS {
                return Self { planes: vec![] };
            }
            if offset > 0.0 {
                normal = -normal;
            }

            planes.push((normal, origin));
        }

        Self { planes }
    }

    pub fn is_degenerate(&self) -> bool {
        self.planes.is_empty()
    }

    /// Tests whether the point lies inside the hull or on its boundary.
    pub fn contains(&self, point: &Point3<f32>) -> bool {
        !self.is_degenerate()
            && self
                .planes
                .iter()
                .all(|(normal, origin)| normal.dot(&(point - origin)) <= HULL_EPS)
    }
}

/// Computes the inside mask of `points` against the hull spanned by `corners`.
pub fn in_hull(points: &[Point3<f32>], corners: &[Point3<f32>; 8]) -> Vec<bool> {
    let hull = Hull::from_corners(corners);
    points.iter().map(|p| hull.contains(p)).collect()
}
