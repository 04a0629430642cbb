//! Residual models of the edge kinds.
//!
//! Every edge error is whitened by a square root of its information matrix, so the
//! squared norm of a whitened residual is the chi2 `eᵀ·Ω·e` of that edge.

use nalgebra::{DMatrix, DVector, Vector3};
use tagmap_core::{Pose, Se3TangentSpace, Skew3};
use tagmap_graph::{Edge, EdgeKind, Measurement};

/// Unweighted error of `edge` given the estimates of its endpoints.
///
/// * pose edges: `[t, log R]` of `Z⁻¹·(start⁻¹·end)`
/// * dummy edges: world-frame rotation difference between `start·Z` and `end`, so that
///   each rotation component addresses a world axis; the translation rows are zero
/// * pixel edges: measured minus projected corner coordinates
pub fn edge_error(edge: &Edge, start: &Pose, end: &Pose) -> DVector<f64> {
    match &edge.measurement {
        Measurement::Pose(measurement) if edge.kind == EdgeKind::Dummy => {
            let predicted = start.rotation() * measurement.rotation();
            let rotation: Skew3 = (predicted * end.rotation().inverse()).into();
            tangent(Se3TangentSpace::new(Vector3::zeros(), rotation.0))
        }
        Measurement::Pose(measurement) => tangent(measurement.between(&start.between(end)).log()),
        Measurement::Pixels {
            corners,
            intrinsics,
            tag_size,
        } => {
            let projected = intrinsics.project_tag(&start.between(end), *tag_size);
            DVector::from_iterator(
                8,
                corners.iter().zip(&projected).flat_map(|(measured, projected)| {
                    let delta = measured - projected;
                    [delta.x, delta.y]
                }),
            )
        }
    }
}

fn tangent(tangent: Se3TangentSpace) -> DVector<f64> {
    DVector::from_column_slice(tangent.to_vec().as_slice())
}

/// A matrix `W` with `Wᵀ·W = information`.
///
/// Diagonal information is square-rooted entrywise; anything else goes through a
/// symmetric eigendecomposition with negative eigenvalues clamped to zero.
pub fn sqrt_information(information: &DMatrix<f64>) -> DMatrix<f64> {
    let n = information.nrows();
    let diagonal = (0..n).all(|r| (0..n).all(|c| r == c || information[(r, c)] == 0.0));
    if diagonal {
        return DMatrix::from_diagonal(&information.diagonal().map(|v| v.max(0.0).sqrt()));
    }
    let symmetric = (information + information.transpose()) * 0.5;
    let eigen = symmetric.symmetric_eigen();
    let sqrt_values = eigen.eigenvalues.map(|v| v.max(0.0).sqrt());
    DMatrix::from_diagonal(&sqrt_values) * eigen.eigenvectors.transpose()
}
