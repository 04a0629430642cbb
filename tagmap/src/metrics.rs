use itertools::Itertools;
use std::collections::BTreeMap;
use tagmap_core::Pose;

/// Mean translation error, in metres, of optimized tag poses against ground truth.
///
/// The two maps need not share an origin. Each common tag in turn anchors the ground truth
/// onto the optimized map, and the translation differences of all common tags are averaged,
/// then averaged over anchors. Returns `None` with fewer than two common tags.
pub fn ground_truth_metric(
    optimized: &BTreeMap<u32, Pose>,
    ground_truth: &BTreeMap<u32, Pose>,
) -> Option<f64> {
    let pairs = optimized
        .iter()
        .filter_map(|(id, pose)| Some((*pose, *ground_truth.get(id)?)))
        .collect_vec();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let total: f64 = pairs
        .iter()
        .map(|&(anchor_optimized, anchor_truth)| {
            let to_optimized = anchor_optimized * anchor_truth.inverse();
            pairs
                .iter()
                .map(|&(optimized, truth)| {
                    ((to_optimized * truth).translation() - optimized.translation()).norm()
                })
                .sum::<f64>()
                / n
        })
        .sum();
    Some(total / n)
}
