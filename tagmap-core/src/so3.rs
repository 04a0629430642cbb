use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Const, Quaternion, Unit, UnitQuaternion, Vector3, Vector6};
use num_traits::Float;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Contains a small translation and rotation that will be appended to
/// the reference frame of some pose.
///
/// This is a member of the lie algebra se(3). When flattened it is laid out as
/// `[x, y, z, rx, ry, rz]`, which is also the layout of every pose residual.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Se3TangentSpace {
    pub translation: Vector3<f64>,
    pub rotation: Vector3<f64>,
}

impl Se3TangentSpace {
    #[inline(always)]
    pub fn new(mut translation: Vector3<f64>, mut rotation: Vector3<f64>) -> Self {
        if translation.iter().any(|n| n.is_nan()) {
            translation = Vector3::zeros();
        }
        if rotation.iter().any(|n| n.is_nan()) {
            rotation = Vector3::zeros();
        }
        Self {
            translation,
            rotation,
        }
    }

    #[inline(always)]
    pub fn to_vec(&self) -> Vector6<f64> {
        Vector6::new(
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        )
    }

    #[inline(always)]
    pub fn from_vec(v: Vector6<f64>) -> Self {
        Self {
            translation: v.rows_generic(0, Const::<3>).into_owned(),
            rotation: v.rows_generic(3, Const::<3>).into_owned(),
        }
    }
}

/// Contains a member of the lie algebra so(3), a representation of the tangent space
/// of 3d rotation.
///
/// Optimization variables and rotation residuals are kept in this form so that they
/// are unconstrained. Estimates themselves are always stored as unit quaternions.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Skew3(pub Vector3<f64>);

impl Skew3 {
    /// Converts the Skew3 to a unit quaternion.
    pub fn rotation(self) -> UnitQuaternion<f64> {
        self.into()
    }

    /// Converts the Skew3 into a unit quaternion quickly, but only works when the rotation
    /// is very small.
    pub fn rotation_small(self) -> UnitQuaternion<f64> {
        let half = self.0 * 0.5;
        UnitQuaternion::new_normalize(Quaternion::new(1.0, half.x, half.y, half.z))
    }
}

/// This is the exponential map.
impl From<Skew3> for UnitQuaternion<f64> {
    fn from(w: Skew3) -> Self {
        // Near zero the axis is undefined.
        let theta2 = w.0.norm_squared();
        if theta2 <= f64::epsilon() {
            w.rotation_small()
        } else {
            let theta = theta2.sqrt();
            let axis = Unit::new_unchecked(w.0 / theta);
            Self::from_axis_angle(&axis, theta)
        }
    }
}

/// This is the log map. The angle of the result is always within `[0, pi]`.
impl From<UnitQuaternion<f64>> for Skew3 {
    fn from(r: UnitQuaternion<f64>) -> Self {
        let skew3 = r.scaled_axis();
        let skew3 = if skew3.iter().any(|n| n.is_nan()) {
            Vector3::zeros()
        } else {
            skew3
        };
        Self(skew3)
    }
}
