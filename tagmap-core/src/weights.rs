//! The weight vector and the information matrices derived from it.
//!
//! A weight `w` turns into the confidence `exp(-w)`: zero gives unit confidence, large
//! positive weights soft-disable a constraint and negative weights tighten it.

use crate::Error;
use core::convert::TryFrom;
use core::fmt;
use core::ops::Range;
use core::str::FromStr;
use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Number of components in a [`WeightVector`].
pub const WEIGHT_VECTOR_LEN: usize = 18;

/// Weights are clamped to this magnitude before exponentiation so that information
/// never overflows.
pub const MAX_LOG_CONFIDENCE: f64 = 200.0;

/// Converts a single weight into a finite, strictly positive confidence.
pub fn confidence(weight: f64) -> f64 {
    (-weight.clamp(-MAX_LOG_CONFIDENCE, MAX_LOG_CONFIDENCE)).exp()
}

/// The four contiguous blocks of a [`WeightVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WeightBlock {
    /// Odometry translation and rotation, `[x, y, z, rx, ry, rz]`.
    Odometry,
    /// Pixel coordinates of tag corners, `[u, v]`.
    TagSba,
    /// Tag observations with covariance prescaling, `[lateral, depth, tilt, spin]`.
    TagCovariance,
    /// Gravity-alignment priors on dummy vertices, `[x, y, z, rx, ry, rz]` in the world frame.
    /// Dummy residuals carry no translation, so only the rotation weights take effect.
    Dummy,
}

impl WeightBlock {
    pub fn range(self) -> Range<usize> {
        match self {
            WeightBlock::Odometry => 0..6,
            WeightBlock::TagSba => 6..8,
            WeightBlock::TagCovariance => 8..12,
            WeightBlock::Dummy => 12..18,
        }
    }

    /// Dimension of the residual this block weights.
    pub fn residual_dim(self) -> usize {
        match self {
            WeightBlock::TagSba => 8,
            _ => 6,
        }
    }

    /// Maps each residual component to the weight that governs it.
    fn residual_weights(self, block: &[f64]) -> Vec<f64> {
        match self {
            WeightBlock::Odometry | WeightBlock::Dummy => block.to_vec(),
            WeightBlock::TagSba => block.iter().copied().cycle().take(8).collect(),
            WeightBlock::TagCovariance => {
                let [lateral, depth, tilt, spin] = [block[0], block[1], block[2], block[3]];
                vec![lateral, lateral, depth, tilt, tilt, spin]
            }
        }
    }
}

/// Named weight vectors used as starting points when tuning a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightPreset {
    Identity,
    SensibleDefault,
    TrustOdom,
    TrustTags,
}

impl WeightPreset {
    pub const ALL: [WeightPreset; 4] = [
        WeightPreset::Identity,
        WeightPreset::SensibleDefault,
        WeightPreset::TrustOdom,
        WeightPreset::TrustTags,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WeightPreset::Identity => "identity",
            WeightPreset::SensibleDefault => "sensible_default",
            WeightPreset::TrustOdom => "trust_odom",
            WeightPreset::TrustTags => "trust_tags",
        }
    }

    #[rustfmt::skip]
    pub fn weights(self) -> WeightVector {
        WeightVector(match self {
            WeightPreset::Identity => [0.0; WEIGHT_VECTOR_LEN],
            WeightPreset::SensibleDefault => [
                -6.0, -6.0, -6.0, -6.0, -6.0, -6.0,
                18.0, 18.0,
                0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, -1.0, 1e2, -1.0,
            ],
            WeightPreset::TrustOdom => [
                -3.0, -3.0, -3.0, -3.0, -3.0, -3.0,
                10.6, 10.6,
                10.6, 10.6, 10.6, 10.6,
                0.0, 0.0, 0.0, -1.0, -1.0, 1e2,
            ],
            WeightPreset::TrustTags => [
                10.0, 10.0, 10.0, 10.0, 10.0, 10.0,
                -10.6, -10.6,
                -10.6, -10.6, -10.6, -10.6,
                0.0, 0.0, 0.0, -1e2, 3.0, 3.0,
            ],
        })
    }
}

impl fmt::Display for WeightPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WeightPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        WeightPreset::ALL
            .iter()
            .copied()
            .find(|preset| preset.name() == s)
            .ok_or_else(|| Error::InvalidWeightVector(format!("unknown weight preset `{}`", s)))
    }
}

/// The 18 weights that set the confidence of every edge class of a graph.
///
/// A weight vector is validated on construction and immutable afterwards; a graph
/// built from it carries a copy.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(Serialize, Deserialize),
    serde(try_from = "Vec<f64>", into = "Vec<f64>")
)]
pub struct WeightVector([f64; WEIGHT_VECTOR_LEN]);

impl WeightVector {
    /// Validates the length and finiteness of `values`.
    pub fn new(values: &[f64]) -> Result<Self, Error> {
        if values.len() != WEIGHT_VECTOR_LEN {
            return Err(Error::InvalidWeightVector(format!(
                "expected {} weights, got {}",
                WEIGHT_VECTOR_LEN,
                values.len()
            )));
        }
        if let Some(ix) = values.iter().position(|w| !w.is_finite()) {
            return Err(Error::InvalidWeightVector(format!(
                "weight {} is {}",
                ix, values[ix]
            )));
        }
        let mut weights = [0.0; WEIGHT_VECTOR_LEN];
        weights.copy_from_slice(values);
        Ok(Self(weights))
    }

    /// All zeros, which gives unit information to every edge.
    pub fn zeros() -> Self {
        WeightPreset::Identity.weights()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn block(&self, block: WeightBlock) -> &[f64] {
        &self.0[block.range()]
    }

    /// Diagonal information matrix for residuals weighted by `block`.
    pub fn information(&self, block: WeightBlock) -> DMatrix<f64> {
        let diagonal = block
            .residual_weights(self.block(block))
            .into_iter()
            .map(confidence);
        DMatrix::from_diagonal(&DVector::from_iterator(block.residual_dim(), diagonal))
    }
}

impl Default for WeightVector {
    fn default() -> Self {
        Self::zeros()
    }
}

impl TryFrom<Vec<f64>> for WeightVector {
    type Error = Error;

    fn try_from(values: Vec<f64>) -> Result<Self, Error> {
        Self::new(&values)
    }
}

impl From<WeightVector> for Vec<f64> {
    fn from(weights: WeightVector) -> Self {
        weights.0.to_vec()
    }
}

/// Parses comma-separated weights without checking their count or finiteness.
pub fn parse_weight_list(s: &str) -> Result<Vec<f64>, Error> {
    s.split(',')
        .map(|v| {
            v.trim().parse::<f64>().map_err(|e| {
                Error::InvalidWeightVector(format!("`{}` is not a preset or number: {}", v, e))
            })
        })
        .collect()
}

/// Accepts either a preset name or 18 comma-separated numbers.
impl FromStr for WeightVector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if let Ok(preset) = s.trim().parse::<WeightPreset>() {
            return Ok(preset.weights());
        }
        Self::new(&parse_weight_list(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn zero_weight_is_unit_confidence() {
        let info = WeightVector::zeros().information(WeightBlock::Odometry);
        assert_eq!(info, DMatrix::identity(6, 6));
    }

    #[test]
    fn sign_convention() {
        let mut values = [0.0; WEIGHT_VECTOR_LEN];
        values[0] = -2.0;
        values[1] = 2.0;
        let info = WeightVector::new(&values)
            .unwrap()
            .information(WeightBlock::Odometry);
        assert_relative_eq!(info[(0, 0)], 2f64.exp());
        assert_relative_eq!(info[(1, 1)], (-2f64).exp());
    }

    #[test]
    fn block_expansion() {
        let mut values = [0.0; WEIGHT_VECTOR_LEN];
        values[6..8].copy_from_slice(&[1.0, 2.0]);
        values[8..12].copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let weights = WeightVector::new(&values).unwrap();
        let sba = weights.information(WeightBlock::TagSba);
        assert_eq!(sba.nrows(), 8);
        assert_relative_eq!(sba[(6, 6)], (-1f64).exp());
        assert_relative_eq!(sba[(7, 7)], (-2f64).exp());
        let tag = weights.information(WeightBlock::TagCovariance).diagonal();
        let expected = DVector::from_iterator(
            6,
            [1.0, 1.0, 2.0, 3.0, 3.0, 4.0].iter().map(|w: &f64| (-w).exp()),
        );
        assert_relative_eq!(tag, expected);
    }

    #[test]
    fn rejects_bad_vectors() {
        assert!(matches!(
            WeightVector::new(&[0.0; 17]),
            Err(Error::InvalidWeightVector(_))
        ));
        let mut values = [0.0; WEIGHT_VECTOR_LEN];
        values[3] = f64::INFINITY;
        assert!(WeightVector::new(&values).is_err());
        assert!("trust_nobody".parse::<WeightVector>().is_err());
    }

    #[test]
    fn parses_presets_and_lists() {
        let preset: WeightVector = "trust_odom".parse().unwrap();
        assert_eq!(preset, WeightPreset::TrustOdom.weights());
        let list: WeightVector = vec!["0.5"; WEIGHT_VECTOR_LEN].join(",").parse().unwrap();
        assert_eq!(list.as_slice(), &[0.5; WEIGHT_VECTOR_LEN][..]);
    }

    #[test]
    fn weight_lists_keep_their_length() {
        assert_eq!(parse_weight_list(" 1, -2.5,3 ").unwrap(), vec![1.0, -2.5, 3.0]);
        assert!(matches!(
            parse_weight_list("1,,3"),
            Err(Error::InvalidWeightVector(_))
        ));
        assert!(matches!(
            "1,2,3".parse::<WeightVector>(),
            Err(Error::InvalidWeightVector(_))
        ));
    }

    #[test]
    fn extreme_weights_stay_finite() {
        for w in [-1e300, -1e3, 1e3, 1e300] {
            let c = confidence(w);
            assert!(c.is_finite() && c > 0.0);
        }
    }

    #[quickcheck]
    fn bounded_weights_give_finite_information(raw: Vec<i16>) -> bool {
        let values: Vec<f64> = raw
            .iter()
            .cycle()
            .take(WEIGHT_VECTOR_LEN)
            .map(|&w| f64::from(w) / 655.36)
            .collect();
        let values = if values.len() == WEIGHT_VECTOR_LEN {
            values
        } else {
            vec![0.0; WEIGHT_VECTOR_LEN]
        };
        let weights = WeightVector::new(&values).unwrap();
        [
            WeightBlock::Odometry,
            WeightBlock::TagSba,
            WeightBlock::TagCovariance,
            WeightBlock::Dummy,
        ]
        .iter()
        .all(|&block| {
            weights
                .information(block)
                .iter()
                .all(|v| v.is_finite() && *v >= 0.0)
        })
    }
}
