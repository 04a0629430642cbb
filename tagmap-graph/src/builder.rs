use crate::{
    information::validate_covariance, Capture, CaptureRecord, CovariancePolicy, EdgeKind, Graph,
    Measurement, OdometrySample, Prescaling, TagObservation, VertexId, VertexMeta,
    WaypointObservation,
};
use float_ord::FloatOrd;
use log::*;
use std::collections::BTreeMap;
use tagmap_core::{
    integrate_path, nalgebra::Vector3, path_deltas, CameraIntrinsics, Error, PixelCorners, Pose,
    WeightVector,
};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Options that shape the graph built from a capture.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Hold the first odometry vertex in place to anchor the map.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_fix_first_odometry")
    )]
    pub fix_first_odometry: bool,
    /// Hold every tag vertex at its initial estimate.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_fix_tag_vertices"))]
    pub fix_tag_vertices: bool,
    /// Add a fixed gravity reference vertex for every odometry vertex. It carries the raw
    /// odometry rotation at the origin and constrains rotation only.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_add_dummy_vertices")
    )]
    pub add_dummy_vertices: bool,
    /// Side length of the printed tags in metres.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_tag_size"))]
    pub tag_size: f64,
    /// Intrinsics used for observations that do not carry their own.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub intrinsics: Option<CameraIntrinsics>,
    /// How observation covariances combine with the tag weight block.
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub covariance_policy: CovariancePolicy,
}

fn default_fix_first_odometry() -> bool {
    true
}

fn default_fix_tag_vertices() -> bool {
    false
}

fn default_add_dummy_vertices() -> bool {
    true
}

fn default_tag_size() -> f64 {
    0.172
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            fix_first_odometry: default_fix_first_odometry(),
            fix_tag_vertices: default_fix_tag_vertices(),
            add_dummy_vertices: default_add_dummy_vertices(),
            tag_size: default_tag_size(),
            intrinsics: None,
            covariance_policy: CovariancePolicy::default(),
        }
    }
}

/// A tag sighting after validation, with everything its edge needs.
enum TagInput {
    Pose(Pose),
    Pixels {
        corners: PixelCorners,
        intrinsics: CameraIntrinsics,
        initial: Pose,
    },
}

enum Sighting<'a> {
    Tag(&'a TagObservation, TagInput),
    Waypoint(&'a WaypointObservation),
}

/// A capture that passed validation. Sightings refer to odometry samples by position.
struct Resolved<'a> {
    odometry: Vec<&'a OdometrySample>,
    sightings: Vec<(usize, Sighting<'a>)>,
}

/// Turns captures into graphs under one prescaling strategy and one weight vector.
///
/// The builder holds no state between builds: building the same capture twice yields
/// identical graphs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphBuilder {
    prescaling: Prescaling,
    weights: WeightVector,
    options: BuildOptions,
}

impl GraphBuilder {
    pub fn new(prescaling: Prescaling, weights: WeightVector) -> Self {
        Self {
            prescaling,
            weights,
            options: BuildOptions::default(),
        }
    }

    pub fn options(self, options: BuildOptions) -> Self {
        Self { options, ..self }
    }

    /// Builds the graph of `capture`.
    ///
    /// The whole capture is validated first, so a malformed capture produces no vertices.
    /// Odometry vertices (each followed by its dummy) get the first ids, then tags and
    /// waypoints in stream order.
    pub fn build(&self, capture: &Capture) -> Result<Graph, Error> {
        let Resolved {
            odometry,
            sightings,
        } = self.resolve(capture)?;

        let raw: Vec<Pose> = odometry.iter().map(|sample| sample.pose).collect();
        let deltas = path_deltas(&raw);
        let estimates = integrate_path(raw[0], deltas.iter().copied());

        let mut graph = Graph::new(
            self.weights,
            self.prescaling,
            self.options.covariance_policy,
        );

        let mut path: Vec<VertexId> = Vec::with_capacity(odometry.len());
        for (pose_index, (sample, estimate)) in odometry.iter().zip(&estimates).enumerate() {
            let id = graph.add_vertex(
                *estimate,
                pose_index == 0 && self.options.fix_first_odometry,
                VertexMeta::Odometry {
                    timestamp: sample.timestamp,
                    pose_index,
                },
            );
            if let Some(&previous) = path.last() {
                graph.add_edge(
                    previous,
                    id,
                    EdgeKind::Odometry,
                    Measurement::Pose(deltas[pose_index - 1]),
                    None,
                )?;
            }
            if self.options.add_dummy_vertices {
                let dummy = graph.add_vertex(
                    Pose::from_parts(Vector3::zeros(), sample.pose.rotation()),
                    true,
                    VertexMeta::Dummy {
                        timestamp: sample.timestamp,
                    },
                );
                graph.add_edge(
                    id,
                    dummy,
                    EdgeKind::Dummy,
                    Measurement::Pose(Pose::identity()),
                    None,
                )?;
            }
            path.push(id);
        }

        let mut tags: BTreeMap<u32, VertexId> = BTreeMap::new();
        let mut waypoints: BTreeMap<&str, VertexId> = BTreeMap::new();
        for (pose_index, sighting) in sightings {
            let from = path[pose_index];
            let from_estimate = estimates[pose_index];
            match sighting {
                Sighting::Tag(observation, input) => {
                    let (measurement, relative, prescale) = match input {
                        TagInput::Pose(relative) => (
                            Measurement::Pose(relative),
                            relative,
                            self.prescaling
                                .observation_prescale(observation.covariance.as_deref()),
                        ),
                        TagInput::Pixels {
                            corners,
                            intrinsics,
                            initial,
                        } => (
                            Measurement::Pixels {
                                corners,
                                intrinsics,
                                tag_size: self.options.tag_size,
                            },
                            initial,
                            None,
                        ),
                    };
                    let fixed = self.options.fix_tag_vertices;
                    let tag = *tags.entry(observation.tag_id).or_insert_with(|| {
                        graph.add_vertex(
                            from_estimate * relative,
                            fixed,
                            VertexMeta::Tag {
                                tag_id: observation.tag_id,
                            },
                        )
                    });
                    graph.add_edge(
                        from,
                        tag,
                        self.prescaling.tag_edge_kind(),
                        measurement,
                        prescale,
                    )?;
                }
                Sighting::Waypoint(observation) => {
                    let waypoint = *waypoints
                        .entry(observation.name.as_str())
                        .or_insert_with(|| {
                            graph.add_vertex(
                                from_estimate * observation.relative_pose,
                                false,
                                VertexMeta::Waypoint {
                                    name: observation.name.clone(),
                                },
                            )
                        });
                    graph.add_edge(
                        from,
                        waypoint,
                        EdgeKind::Waypoint,
                        Measurement::Pose(observation.relative_pose),
                        None,
                    )?;
                }
            }
        }

        debug!(
            "built {} graph with {} vertices ({} odometry, {} tags, {} waypoints) and {} edges",
            self.prescaling,
            graph.num_vertices(),
            path.len(),
            tags.len(),
            waypoints.len(),
            graph.edges().len()
        );
        Ok(graph)
    }

    fn resolve<'a>(&self, capture: &'a Capture) -> Result<Resolved<'a>, Error> {
        let odometry: Vec<&OdometrySample> = capture.odometry_samples().collect();
        if odometry.is_empty() {
            return Err(Error::MalformedCapture(
                "capture has no odometry samples".to_string(),
            ));
        }
        for sample in &odometry {
            if !sample.timestamp.is_finite() || !sample.pose.is_finite() {
                return Err(Error::MalformedCapture(format!(
                    "odometry sample at {} is not finite",
                    sample.timestamp
                )));
            }
        }
        if let Some(pair) = odometry
            .windows(2)
            .find(|pair| pair[0].timestamp >= pair[1].timestamp)
        {
            return Err(Error::MalformedCapture(format!(
                "odometry timestamp {} follows {}",
                pair[1].timestamp, pair[0].timestamp
            )));
        }
        let index: BTreeMap<FloatOrd<f64>, usize> = odometry
            .iter()
            .enumerate()
            .map(|(ix, sample)| (FloatOrd(sample.timestamp), ix))
            .collect();
        let lookup = |timestamp: f64, what: &dyn Fn() -> String| {
            index.get(&FloatOrd(timestamp)).copied().ok_or_else(|| {
                Error::MalformedCapture(format!(
                    "{} at {} has no odometry sample",
                    what(),
                    timestamp
                ))
            })
        };

        let mut sightings = vec![];
        for record in &capture.records {
            match record {
                CaptureRecord::Odometry(_) => {}
                CaptureRecord::Tag(observation) => {
                    let ix = lookup(observation.timestamp, &|| {
                        format!("observation of tag {}", observation.tag_id)
                    })?;
                    let input = self.tag_input(observation)?;
                    sightings.push((ix, Sighting::Tag(observation, input)));
                }
                CaptureRecord::Waypoint(observation) => {
                    let ix = lookup(observation.timestamp, &|| {
                        format!("waypoint `{}`", observation.name)
                    })?;
                    if !observation.relative_pose.is_finite() {
                        return Err(Error::MalformedCapture(format!(
                            "waypoint `{}` has a non-finite pose",
                            observation.name
                        )));
                    }
                    sightings.push((ix, Sighting::Waypoint(observation)));
                }
            }
        }
        Ok(Resolved {
            odometry,
            sightings,
        })
    }

    fn tag_input(&self, observation: &TagObservation) -> Result<TagInput, Error> {
        let malformed = |reason: &str| {
            Error::MalformedCapture(format!(
                "observation of tag {} at {} {}",
                observation.tag_id, observation.timestamp, reason
            ))
        };
        if let Some(covariance) = &observation.covariance {
            validate_covariance(covariance)?;
        }
        if let Some(pose) = &observation.relative_pose {
            if !pose.is_finite() {
                return Err(malformed("has a non-finite pose"));
            }
        }
        match self.prescaling {
            Prescaling::UseSba => {
                let corners = observation
                    .pixel_corners
                    .ok_or_else(|| malformed("has no pixel corners"))?;
                if corners.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                    return Err(malformed("has non-finite pixel corners"));
                }
                let intrinsics = observation
                    .intrinsics
                    .or(self.options.intrinsics)
                    .ok_or_else(|| malformed("has no camera intrinsics"))?;
                if !(self.options.tag_size > 0.0) {
                    return Err(malformed("needs a positive tag size"));
                }
                let initial = match observation.relative_pose {
                    Some(pose) => pose,
                    None => intrinsics
                        .approximate_tag_pose(&corners, self.options.tag_size)
                        .ok_or_else(|| malformed("has collapsed pixel corners"))?,
                };
                Ok(TagInput::Pixels {
                    corners,
                    intrinsics,
                    initial,
                })
            }
            _ => observation
                .relative_pose
                .map(TagInput::Pose)
                .ok_or_else(|| malformed("has no relative pose")),
        }
    }
}
