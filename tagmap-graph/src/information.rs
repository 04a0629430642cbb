//! Tag prescaling strategies and the rule that turns weights plus prescaling into
//! the information matrix of an edge.

use crate::{EdgeKind, COVARIANCE_LEN};
use core::fmt;
use core::str::FromStr;
use log::*;
use nalgebra::DMatrix;
use tagmap_core::{Error, WeightVector};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Singular values below this are dropped when a covariance has to be pseudo-inverted.
const PSEUDO_INVERSE_EPSILON: f64 = 1e-12;

/// How tag observations are turned into edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum Prescaling {
    /// Pixel-corner reprojection residuals.
    UseSba,
    /// Relative pose residuals prescaled by the full observation covariance.
    FullCov,
    /// Relative pose residuals prescaled by the diagonal of the observation covariance.
    DiagCov,
    /// Relative pose residuals weighted by the weight vector alone.
    Ones,
}

impl Prescaling {
    pub const ALL: [Prescaling; 4] = [
        Prescaling::UseSba,
        Prescaling::FullCov,
        Prescaling::DiagCov,
        Prescaling::Ones,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Prescaling::UseSba => "USE_SBA",
            Prescaling::FullCov => "FULL_COV",
            Prescaling::DiagCov => "DIAG_COV",
            Prescaling::Ones => "ONES",
        }
    }

    /// Kind of the edges this strategy creates for tag observations.
    pub fn tag_edge_kind(self) -> EdgeKind {
        match self {
            Prescaling::UseSba => EdgeKind::TagSba,
            _ => EdgeKind::TagCovariance,
        }
    }

    /// Per-observation information that multiplies into the weight block, or `None` for identity.
    pub fn observation_prescale(self, covariance: Option<&[f64]>) -> Option<DMatrix<f64>> {
        match self {
            Prescaling::UseSba | Prescaling::Ones => None,
            Prescaling::FullCov | Prescaling::DiagCov => {
                let covariance = match covariance {
                    Some(covariance) => DMatrix::from_row_slice(6, 6, covariance),
                    None => {
                        warn!(
                            "observation has no covariance, using identity prescaling under {}",
                            self
                        );
                        return None;
                    }
                };
                Some(if self == Prescaling::DiagCov {
                    DMatrix::from_diagonal(&covariance.diagonal().map(|v| {
                        if v > PSEUDO_INVERSE_EPSILON {
                            v.recip()
                        } else {
                            0.0
                        }
                    }))
                } else {
                    invert_covariance(covariance)
                })
            }
        }
    }
}

/// Checks the shape and finiteness of an observation covariance.
pub(crate) fn validate_covariance(covariance: &[f64]) -> Result<(), Error> {
    if covariance.len() != COVARIANCE_LEN {
        return Err(Error::MalformedCapture(format!(
            "covariance has {} entries instead of {}",
            covariance.len(),
            COVARIANCE_LEN
        )));
    }
    if covariance.iter().any(|v| !v.is_finite()) {
        return Err(Error::MalformedCapture(
            "covariance has a non-finite entry".to_string(),
        ));
    }
    Ok(())
}

fn invert_covariance(covariance: DMatrix<f64>) -> DMatrix<f64> {
    let symmetric = (&covariance + covariance.transpose()) * 0.5;
    match symmetric.clone().try_inverse() {
        Some(information) => information,
        None => symmetric
            .pseudo_inverse(PSEUDO_INVERSE_EPSILON)
            .unwrap_or_else(|_| DMatrix::zeros(6, 6)),
    }
}

impl fmt::Display for Prescaling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Prescaling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        Prescaling::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown prescaling strategy `{}`", s))
    }
}

/// How a per-observation information `P` combines with the weight-block information `D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum CovariancePolicy {
    /// `D^½ · P · D^½`: every weight rescales its row and column of `P`.
    Scaled,
    /// `P + D`: the observation and the weight block act as independent priors.
    Summed,
}

impl Default for CovariancePolicy {
    fn default() -> Self {
        CovariancePolicy::Scaled
    }
}

impl CovariancePolicy {
    fn combine(self, prescale: &DMatrix<f64>, weighted: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            CovariancePolicy::Scaled => {
                let sqrt = weighted.diagonal().map(f64::sqrt);
                DMatrix::from_fn(prescale.nrows(), prescale.ncols(), |r, c| {
                    sqrt[r] * prescale[(r, c)] * sqrt[c]
                })
            }
            CovariancePolicy::Summed => prescale + weighted,
        }
    }
}

/// Information of an edge of `kind` under `weights`. Waypoint edges carry unit information.
pub fn edge_information(
    kind: EdgeKind,
    prescale: Option<&DMatrix<f64>>,
    weights: &WeightVector,
    policy: CovariancePolicy,
) -> DMatrix<f64> {
    match kind.weight_block() {
        None => DMatrix::identity(6, 6),
        Some(block) => {
            let weighted = weights.information(block);
            match prescale {
                Some(prescale) => policy.combine(prescale, &weighted),
                None => weighted,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn covariance() -> Vec<f64> {
        let mut c = DMatrix::<f64>::identity(6, 6) * 0.25;
        c[(0, 1)] = 0.1;
        c[(1, 0)] = 0.1;
        c.transpose().as_slice().to_vec()
    }

    #[test]
    fn full_keeps_correlation() {
        let p = Prescaling::FullCov
            .observation_prescale(Some(&covariance()))
            .unwrap();
        assert!(p[(0, 1)].abs() > 0.0);
        let back = p.try_inverse().unwrap();
        assert_relative_eq!(back[(0, 1)], 0.1, epsilon = 1e-12);
        assert_relative_eq!(back[(2, 2)], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn diagonal_drops_correlation() {
        let p = Prescaling::DiagCov
            .observation_prescale(Some(&covariance()))
            .unwrap();
        assert_eq!(p[(0, 1)], 0.0);
        assert_relative_eq!(p[(0, 0)], 4.0);
    }

    #[test]
    fn ones_and_missing_covariance_are_identity() {
        assert!(Prescaling::Ones
            .observation_prescale(Some(&covariance()))
            .is_none());
        assert!(Prescaling::FullCov.observation_prescale(None).is_none());
    }

    #[test]
    fn singular_covariance_is_pseudo_inverted() {
        let mut c = vec![0.0; COVARIANCE_LEN];
        c[0] = 2.0;
        let p = Prescaling::FullCov.observation_prescale(Some(&c)).unwrap();
        assert!(p.iter().all(|v| v.is_finite()));
        assert_relative_eq!(p[(0, 0)], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn policies() {
        let weights = WeightVector::new(&[1.0; 18]).unwrap();
        let prescale = DMatrix::from_element(6, 6, 2.0);
        let scaled = edge_information(
            EdgeKind::TagCovariance,
            Some(&prescale),
            &weights,
            CovariancePolicy::Scaled,
        );
        assert_relative_eq!(scaled[(0, 3)], 2.0 * (-1f64).exp(), epsilon = 1e-12);
        let summed = edge_information(
            EdgeKind::TagCovariance,
            Some(&prescale),
            &weights,
            CovariancePolicy::Summed,
        );
        assert_relative_eq!(summed[(0, 0)], 2.0 + (-1f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(summed[(0, 3)], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn parses_names() {
        assert_eq!("full_cov".parse::<Prescaling>(), Ok(Prescaling::FullCov));
        assert!("half_cov".parse::<Prescaling>().is_err());
    }
}
