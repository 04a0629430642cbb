//! # tagmap-core
//!
//! Types shared by every crate of the tagmap pose graph engine.
//!
//! * [`Pose`] - rigid transforms as translation plus unit quaternion, with the
//!   composition, inversion and retraction used by the optimizer
//! * [`Se3TangentSpace`] and [`Skew3`] - the tangent spaces the optimizer steps in
//! * [`CameraIntrinsics`] - pinhole projection of tag corners for pixel residuals
//! * [`WeightVector`] - the 18 weights that set edge confidences
//! * [`Error`] - the failure taxonomy shared by building and optimizing

mod camera;
mod error;
mod pose;
mod so3;
mod weights;

pub use camera::*;
pub use error::*;
pub use nalgebra;
pub use pose::*;
pub use so3::*;
pub use weights::*;
