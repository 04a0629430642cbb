use crate::{Error, Se3TangentSpace, Skew3};
use core::convert::TryFrom;
use core::ops::Mul;
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Quaternions shorter than this cannot be normalized into a rotation.
const MIN_QUATERNION_NORM: f64 = 1e-9;

/// A rigid transform made of a translation and a unit quaternion.
///
/// Poses are the estimates of every vertex and the measurements of every
/// pose-to-pose edge. When exchanged as data they use the 7-vector layout
/// `[x, y, z, qx, qy, qz, qw]`.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(Serialize, Deserialize),
    serde(try_from = "[f64; 7]", into = "[f64; 7]")
)]
pub struct Pose(pub Isometry3<f64>);

impl Pose {
    /// Creates a pose with no change in position or orientation.
    pub fn identity() -> Self {
        Self(Isometry3::identity())
    }

    pub fn from_parts(translation: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self(Isometry3::from_parts(Translation3::from(translation), rotation))
    }

    /// Reads a `[x, y, z, qx, qy, qz, qw]` vector, normalizing the quaternion.
    pub fn from_vector(v: [f64; 7]) -> Result<Self, Error> {
        if v.iter().any(|n| !n.is_finite()) {
            return Err(Error::MalformedCapture(format!(
                "pose {:?} has a non-finite component",
                v
            )));
        }
        let [x, y, z, qx, qy, qz, qw] = v;
        let quaternion = Quaternion::new(qw, qx, qy, qz);
        let rotation = UnitQuaternion::try_new(quaternion, MIN_QUATERNION_NORM).ok_or_else(|| {
            Error::MalformedCapture(format!("pose {:?} has a zero quaternion", v))
        })?;
        Ok(Self::from_parts(Vector3::new(x, y, z), rotation))
    }

    pub fn to_vector(&self) -> [f64; 7] {
        let t = self.translation();
        let q = self.rotation();
        [t.x, t.y, t.z, q.i, q.j, q.k, q.w]
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.0.translation.vector
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.0.rotation
    }

    #[must_use]
    pub fn inverse(&self) -> Self {
        Self(self.0.inverse())
    }

    /// The transform that takes `self` to `other`, i.e. `self⁻¹ · other`.
    #[must_use]
    pub fn between(&self, other: &Self) -> Self {
        Self(self.0.inv_mul(&other.0))
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.0 * point
    }

    /// Moves the pose along a tangent step. The translation is added in the parent
    /// frame and the rotation is right-multiplied through the exponential map, so
    /// the quaternion never leaves the unit sphere.
    #[must_use]
    pub fn retract(&self, delta: &Se3TangentSpace) -> Self {
        let mut rotation = self.rotation() * Skew3(delta.rotation).rotation();
        rotation.renormalize();
        Self::from_parts(self.translation() + delta.translation, rotation)
    }

    /// The tangent step that [`Pose::retract`] needs to move `self` onto `other`.
    pub fn local(&self, other: &Self) -> Se3TangentSpace {
        let rotation: Skew3 = (self.rotation().inverse() * other.rotation()).into();
        Se3TangentSpace::new(other.translation() - self.translation(), rotation.0)
    }

    /// Translation and rotation vector of the transform itself. Zero for the identity.
    pub fn log(&self) -> Se3TangentSpace {
        let rotation: Skew3 = self.rotation().into();
        Se3TangentSpace::new(self.translation(), rotation.0)
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|n| n.is_finite())
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Pose {
    type Output = Pose;

    fn mul(self, rhs: Pose) -> Pose {
        Pose(self.0 * rhs.0)
    }
}

impl TryFrom<[f64; 7]> for Pose {
    type Error = Error;

    fn try_from(v: [f64; 7]) -> Result<Self, Error> {
        Self::from_vector(v)
    }
}

impl From<Pose> for [f64; 7] {
    fn from(pose: Pose) -> Self {
        pose.to_vector()
    }
}

/// Chains relative transforms onto `start`, producing one pose per step plus the start.
///
/// This is the dead-reckoning used to seed odometry estimates; it reproduces the poses
/// that [`path_deltas`] was computed from.
pub fn integrate_path(start: Pose, deltas: impl IntoIterator<Item = Pose>) -> Vec<Pose> {
    let mut path = vec![start];
    let mut current = start;
    for delta in deltas {
        current = current * delta;
        path.push(current);
    }
    path
}

/// Relative transforms between consecutive poses of a path.
pub fn path_deltas(poses: &[Pose]) -> Vec<Pose> {
    poses
        .windows(2)
        .map(|pair| pair[0].between(&pair[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;

    fn pose(t: [f64; 3], r: [f64; 3]) -> Pose {
        Pose::from_parts(
            Vector3::from(t),
            UnitQuaternion::from_scaled_axis(Vector3::from(r)),
        )
    }

    #[test]
    fn vector_layout() {
        let p = Pose::from_vector([1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 2.0]).unwrap();
        assert_eq!(p.to_vector(), [1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn rejects_zero_quaternion() {
        assert!(matches!(
            Pose::from_vector([0.0; 7]),
            Err(Error::MalformedCapture(_))
        ));
        assert!(Pose::from_vector([f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn between_composes_back() {
        let a = pose([1.0, -2.0, 0.5], [0.1, 0.4, -0.2]);
        let b = pose([-0.3, 4.0, 1.5], [-0.5, 0.2, 0.9]);
        let recovered = a * a.between(&b);
        assert_relative_eq!(recovered.0, b.0, epsilon = 1e-12);
    }

    #[test]
    fn retract_local_inverse() {
        let a = pose([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        let b = pose([0.0, 2.0, -1.0], [0.3, 0.8, -0.1]);
        let step = a.local(&b);
        assert_relative_eq!(a.retract(&step).0, b.0, epsilon = 1e-12);
    }

    #[test]
    fn log_of_identity_is_zero() {
        assert_eq!(Pose::identity().log().to_vec(), nalgebra::Vector6::zeros());
    }

    #[quickcheck]
    fn dead_reckoning_is_lossless(steps: Vec<(i8, i8, i8, i8, i8, i8)>) -> bool {
        let poses: Vec<Pose> = steps
            .iter()
            .scan(Pose::identity(), |acc, &(x, y, z, a, b, c)| {
                let step = pose(
                    [x as f64 * 0.1, y as f64 * 0.1, z as f64 * 0.1],
                    [a as f64 * 0.01, b as f64 * 0.01, c as f64 * 0.01],
                );
                *acc = *acc * step;
                Some(*acc)
            })
            .collect();
        if poses.is_empty() {
            return integrate_path(Pose::identity(), path_deltas(&poses)).len() == 1;
        }
        let integrated = integrate_path(poses[0], path_deltas(&poses));
        integrated.len() == poses.len()
            && integrated
                .iter()
                .zip(&poses)
                .all(|(a, b)| approx::relative_eq!(a.0, b.0, epsilon = 1e-6))
    }
}
