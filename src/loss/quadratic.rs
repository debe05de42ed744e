use log::error;

use crate::activation::activation::sigmoid_prime;
use crate::error::{NnError, Result};
use crate::math::matrix::Matrix;

/// Quadratic cost paired with a sigmoid output layer.
pub struct QuadraticCost;

impl QuadraticCost {
    /// `½ · Σ (expected − output)²`, summed over every element (not averaged).
    pub fn cost(output: &Matrix, expected: &Matrix) -> Result<f64> {
        let error = expected.subtract(output)?;
        Ok(0.5 * error.apply_second(f64::powf, 2.0).sum())
    }

    /// Output-layer error `(label − output) ⊙ σ'(z)` written to `dest`.
    pub fn delta(z: &Matrix, output: &Matrix, label: &Matrix, dest: &mut Matrix) -> Result<()> {
        check_delta_shapes(z, output, dest, "QuadraticCost::delta")?;
        label.subtract_into(output, dest)?;
        dest.multiply_in_place(&sigmoid_prime(z))
    }
}

/// `dest` and `z` must both match `output` before anything is written.
pub(crate) fn check_delta_shapes(
    z: &Matrix,
    output: &Matrix,
    dest: &Matrix,
    op: &'static str,
) -> Result<()> {
    for other in [dest, z] {
        if other.shape() != output.shape() {
            error!("{op}: matrix does not match the output matrix");
            return Err(NnError::DimensionMismatch {
                op,
                left_rows: output.rows(),
                left_cols: output.cols(),
                right_rows: other.rows(),
                right_cols: other.cols(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::sigmoid;
    use approx::assert_abs_diff_eq;

    fn col(values: &[f64]) -> Matrix {
        Matrix::from_vec(values.len(), 1, values.to_vec()).unwrap()
    }

    #[test]
    fn cost_is_half_sum_of_squares() {
        let output = col(&[0.2, 0.9, 0.5]);
        let expected = col(&[0.0, 1.0, 1.0]);
        let c = QuadraticCost::cost(&output, &expected).unwrap();
        assert_abs_diff_eq!(c, 0.5 * (0.04 + 0.01 + 0.25), epsilon = 1e-12);
    }

    #[test]
    fn cost_rejects_mismatched_shapes() {
        assert!(QuadraticCost::cost(&col(&[0.1, 0.2]), &col(&[1.0])).is_err());
    }

    #[test]
    fn delta_includes_sigmoid_derivative() {
        let z = col(&[0.3, -1.2]);
        let output = z.apply(sigmoid);
        let label = col(&[1.0, 0.0]);
        let mut dest = Matrix::zeros(2, 1);
        QuadraticCost::delta(&z, &output, &label, &mut dest).unwrap();
        for i in 0..2 {
            let a = output.get(i, 0).unwrap();
            let expected = (label.get(i, 0).unwrap() - a) * a * (1.0 - a);
            assert_abs_diff_eq!(dest.get(i, 0).unwrap(), expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn delta_rejects_wrong_destination() {
        let z = col(&[0.0, 0.0]);
        let mut dest = Matrix::zeros(1, 2);
        assert!(QuadraticCost::delta(&z, &z, &z, &mut dest).is_err());
        assert_eq!(dest.as_slice(), &[0.0, 0.0]);
    }
}
