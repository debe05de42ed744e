use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};
use crate::loss::cross_entropy::CrossEntropyCost;
use crate::loss::quadratic::QuadraticCost;
use crate::math::matrix::Matrix;

/// Selects the cost strategy a network trains with.
///
/// The cost and its matching delta always come from the same variant, so a
/// network can never pair one strategy's cost with another's delta.
///
/// - `Quadratic`: `½‖y − a‖²`, delta `(y − a) ⊙ σ'(z)`.
/// - `CrossEntropy`: `−Σ y·log10(a)`, delta `y − a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostFunction {
    #[default]
    Quadratic,
    CrossEntropy,
}

impl CostFunction {
    pub fn cost(&self, output: &Matrix, expected: &Matrix) -> Result<f64> {
        match self {
            CostFunction::Quadratic => QuadraticCost::cost(output, expected),
            CostFunction::CrossEntropy => CrossEntropyCost::cost(output, expected),
        }
    }

    pub fn delta(&self, z: &Matrix, output: &Matrix, label: &Matrix, dest: &mut Matrix) -> Result<()> {
        match self {
            CostFunction::Quadratic => QuadraticCost::delta(z, output, label, dest),
            CostFunction::CrossEntropy => CrossEntropyCost::delta(z, output, label, dest),
        }
    }

    /// Selector byte used by the binary model format.
    pub fn code(&self) -> u8 {
        match self {
            CostFunction::Quadratic => 0,
            CostFunction::CrossEntropy => 1,
        }
    }

    pub fn from_code(code: u8) -> Result<CostFunction> {
        match code {
            0 => Ok(CostFunction::Quadratic),
            1 => Ok(CostFunction::CrossEntropy),
            other => Err(NnError::Model(format!("unknown cost function selector {other}"))),
        }
    }
}

impl fmt::Display for CostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostFunction::Quadratic => f.write_str("quadratic"),
            CostFunction::CrossEntropy => f.write_str("cross-entropy"),
        }
    }
}

impl FromStr for CostFunction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quadratic" | "mse" => Ok(CostFunction::Quadratic),
            "cross-entropy" | "cross_entropy" | "ce" => Ok(CostFunction::CrossEntropy),
            other => Err(format!(
                "unknown cost function '{other}', expected 'quadratic' or 'cross-entropy'"
            )),
        }
    }
}
