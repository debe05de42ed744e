use crate::error::Result;
use crate::loss::quadratic::check_delta_shapes;
use crate::math::matrix::Matrix;

/// Cross-entropy cost paired with a sigmoid output layer.
///
/// The reported cost uses a base-10 logarithm, while the delta is the
/// natural-log simplification `label − output`. The two are kept as they are;
/// only the delta drives training.
pub struct CrossEntropyCost;

impl CrossEntropyCost {
    /// `−Σ expected ⊙ log10(output)`
    pub fn cost(output: &Matrix, expected: &Matrix) -> Result<f64> {
        let log_output = output.apply(f64::log10);
        Ok(-log_output.multiply(expected)?.sum())
    }

    /// Output-layer error `label − output`; the σ'(z) factor cancels.
    pub fn delta(z: &Matrix, output: &Matrix, label: &Matrix, dest: &mut Matrix) -> Result<()> {
        check_delta_shapes(z, output, dest, "CrossEntropyCost::delta")?;
        label.subtract_into(output, dest)
    }
}
