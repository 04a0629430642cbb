//! Pinhole projection of fiducial tag corners.
//!
//! Odometry poses describe the phone. The camera looking out of the phone shares its
//! origin but has its y and z axes negated, so a point straight ahead of the camera
//! has a negative z in the phone frame.

use crate::Pose;
use nalgebra::{Point2, Point3, UnitQuaternion, Vector2, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Depth below which a point is treated as sitting on the image plane.
const MIN_DEPTH: f64 = 1e-6;

/// Four pixel corners of a tag in the order top-left, top-right, bottom-right, bottom-left.
pub type PixelCorners = [Point2<f64>; 4];

/// Focal lengths and principal point of the phone camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    /// Projects a point given in the camera frame onto the image.
    pub fn project(&self, point: &Point3<f64>) -> Point2<f64> {
        let z = point.z.max(MIN_DEPTH);
        Point2::new(
            self.focals.x * point.x / z + self.principal_point.x,
            self.focals.y * point.y / z + self.principal_point.y,
        )
    }

    /// Projects the corners of a tag of side `tag_size` placed at `phone_to_tag`.
    pub fn project_tag(&self, phone_to_tag: &Pose, tag_size: f64) -> PixelCorners {
        tag_corners(tag_size).map(|corner| {
            let phone_point = phone_to_tag.transform_point(&corner);
            self.project(&phone_to_camera(&phone_point))
        })
    }

    /// A rough tag pose from its pixel corners: depth from the apparent side length, lateral
    /// position from the corner centroid, tag facing the phone.
    ///
    /// Returns `None` when the corners collapse onto a point.
    pub fn approximate_tag_pose(&self, corners: &PixelCorners, tag_size: f64) -> Option<Pose> {
        let side = (0..4)
            .map(|i| (corners[(i + 1) % 4] - corners[i]).norm())
            .sum::<f64>()
            / 4.0;
        if !side.is_finite() || side <= f64::EPSILON {
            return None;
        }
        let focal = 0.5 * (self.focals.x + self.focals.y);
        let depth = focal * tag_size / side;
        let centroid = corners.iter().fold(Vector2::zeros(), |acc, c| acc + c.coords) / 4.0;
        let camera_point = Point3::new(
            (centroid.x - self.principal_point.x) / self.focals.x * depth,
            (centroid.y - self.principal_point.y) / self.focals.y * depth,
            depth,
        );
        // A tag facing the camera has its axes flipped the same way as the camera, so in
        // the phone frame its rotation is the identity.
        Some(Pose::from_parts(
            phone_to_camera(&camera_point).coords,
            UnitQuaternion::identity(),
        ))
    }
}

/// Corners of a tag of side `tag_size` in the tag frame, in [`PixelCorners`] order.
pub fn tag_corners(tag_size: f64) -> [Point3<f64>; 4] {
    let h = tag_size / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

/// Converts a point between the phone frame and the camera frame. The conversion is its
/// own inverse.
pub fn phone_to_camera(point: &Point3<f64>) -> Point3<f64> {
    Point3::from(point.coords.component_mul(&Vector3::new(1.0, -1.0, -1.0)))
}
