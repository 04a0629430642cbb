#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::f64::consts::PI;
use tagmap_core::nalgebra::{UnitQuaternion, Vector3};
use tagmap_core::Pose;
use tagmap_graph::{Capture, TagObservation};

pub const TAGS: u32 = 4;

pub fn pose(t: [f64; 3], r: [f64; 3]) -> Pose {
    Pose::from_parts(
        Vector3::from(t),
        UnitQuaternion::from_scaled_axis(Vector3::from(r)),
    )
}

fn jitter(rng: &mut Pcg64, translation: f64, rotation: f64) -> Pose {
    let mut sample = |scale: f64| [(); 3].map(|_| rng.gen_range(-scale..=scale));
    let t = sample(translation);
    let r = sample(rotation);
    pose(t, r)
}

/// Phone pose `i` of `n` on a circle of radius 3 around the y (gravity) axis.
pub fn true_phone(i: usize, n: usize) -> Pose {
    let theta = 2.0 * PI * i as f64 / n as f64;
    pose(
        [3.0 * theta.sin(), 0.0, 3.0 * theta.cos()],
        [0.0, theta, 0.0],
    )
}

/// Tag `k` on a circle of radius 5 around the same axis.
pub fn true_tag(k: u32) -> Pose {
    let theta = 2.0 * PI * k as f64 / TAGS as f64;
    pose(
        [5.0 * theta.sin(), 0.2, 5.0 * theta.cos()],
        [0.0, theta, 0.0],
    )
}

/// A lap around the tags with drifting odometry and slightly noisy tag sightings.
pub fn noisy_loop(seed: u64, n: usize) -> Capture {
    let mut rng = Pcg64::seed_from_u64(seed);
    let truth: Vec<Pose> = (0..n).map(|i| true_phone(i, n)).collect();
    let mut capture = Capture::new();
    let mut raw = truth[0];
    for i in 0..n {
        if i > 0 {
            let step = truth[i - 1].between(&truth[i]);
            raw = raw * step * jitter(&mut rng, 0.02, 0.01);
        }
        let timestamp = i as f64 / 30.0;
        capture = capture.odometry(timestamp, raw);
        let k = ((i * TAGS as usize + n / 2) / n) as u32 % TAGS;
        let relative = truth[i].between(&true_tag(k)) * jitter(&mut rng, 0.01, 0.005);
        let mut covariance = vec![0.0; 36];
        for d in 0..6 {
            covariance[d * 7] = if d < 3 { 1e-4 } else { 2.5e-5 };
        }
        capture =
            capture.tag(TagObservation::from_pose(timestamp, k, relative).covariance(covariance));
    }
    capture
}
