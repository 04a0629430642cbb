//! Capture records as produced by the phone app, already resolved to poses and pixels.

use tagmap_core::{CameraIntrinsics, PixelCorners, Pose};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Number of entries of a row-major 6x6 observation covariance.
pub const COVARIANCE_LEN: usize = 36;

/// An odometry pose of the phone in the session frame.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct OdometrySample {
    pub timestamp: f64,
    pub pose: Pose,
}

/// A sighting of a tag from the odometry sample with the same timestamp.
///
/// Which fields are required depends on the prescaling strategy: pixel-corner
/// residuals need `pixel_corners`, every other strategy needs `relative_pose`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct TagObservation {
    pub timestamp: f64,
    pub tag_id: u32,
    /// Pose of the tag in the phone frame.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub relative_pose: Option<Pose>,
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub pixel_corners: Option<PixelCorners>,
    /// Row-major 6x6 covariance of `relative_pose` over `[x, y, z, rx, ry, rz]`.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub covariance: Option<Vec<f64>>,
    /// Overrides the intrinsics given to the builder for this frame.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub intrinsics: Option<CameraIntrinsics>,
}

impl TagObservation {
    pub fn from_pose(timestamp: f64, tag_id: u32, relative_pose: Pose) -> Self {
        Self {
            timestamp,
            tag_id,
            relative_pose: Some(relative_pose),
            pixel_corners: None,
            covariance: None,
            intrinsics: None,
        }
    }

    pub fn from_pixels(timestamp: f64, tag_id: u32, pixel_corners: PixelCorners) -> Self {
        Self {
            timestamp,
            tag_id,
            relative_pose: None,
            pixel_corners: Some(pixel_corners),
            covariance: None,
            intrinsics: None,
        }
    }

    pub fn covariance(self, covariance: Vec<f64>) -> Self {
        Self {
            covariance: Some(covariance),
            ..self
        }
    }
}

/// A named location marked by the user while standing at an odometry sample.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WaypointObservation {
    pub timestamp: f64,
    pub name: String,
    pub relative_pose: Pose,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(Serialize, Deserialize),
    serde(tag = "type", rename_all = "snake_case")
)]
pub enum CaptureRecord {
    Odometry(OdometrySample),
    Tag(TagObservation),
    Waypoint(WaypointObservation),
}

/// An ordered stream of capture records.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(Serialize, Deserialize),
    serde(transparent)
)]
pub struct Capture {
    pub records: Vec<CaptureRecord>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn odometry(mut self, timestamp: f64, pose: Pose) -> Self {
        self.records
            .push(CaptureRecord::Odometry(OdometrySample { timestamp, pose }));
        self
    }

    pub fn tag(mut self, observation: TagObservation) -> Self {
        self.records.push(CaptureRecord::Tag(observation));
        self
    }

    pub fn waypoint(
        mut self,
        timestamp: f64,
        name: impl Into<String>,
        relative_pose: Pose,
    ) -> Self {
        self.records.push(CaptureRecord::Waypoint(WaypointObservation {
            timestamp,
            name: name.into(),
            relative_pose,
        }));
        self
    }

    pub fn odometry_samples(&self) -> impl Iterator<Item = &OdometrySample> + '_ {
        self.records.iter().filter_map(|record| match record {
            CaptureRecord::Odometry(sample) => Some(sample),
            _ => None,
        })
    }

    pub fn tag_observations(&self) -> impl Iterator<Item = &TagObservation> + '_ {
        self.records.iter().filter_map(|record| match record {
            CaptureRecord::Tag(observation) => Some(observation),
            _ => None,
        })
    }

    pub fn waypoint_observations(&self) -> impl Iterator<Item = &WaypointObservation> + '_ {
        self.records.iter().filter_map(|record| match record {
            CaptureRecord::Waypoint(observation) => Some(observation),
            _ => None,
        })
    }
}
