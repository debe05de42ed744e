use log::error;

use crate::error::{NnError, Result};
use crate::math::matrix::Matrix;

/// Logistic function `1 / (1 + e^(-z))`.
pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Elementwise `σ(z) · (1 − σ(z))` in a new matrix.
pub fn sigmoid_prime(target: &Matrix) -> Matrix {
    target.apply(|z| {
        let s = sigmoid(z);
        s * (1.0 - s)
    })
}

/// Elementwise `σ(z) · (1 − σ(z))` written to `dest`, which must have the
/// same shape as `target`.
pub fn sigmoid_prime_into(target: &Matrix, dest: &mut Matrix) -> Result<()> {
    check_same_shape(target, dest, "sigmoid_prime_into")?;
    let s = target.apply(sigmoid);
    dest.populate(1.0);
    dest.subtract_in_place(&s)?;
    dest.multiply_in_place(&s)
}

/// Column-wise softmax: each column is normalised independently so it sums
/// to one.
pub fn softmax(target: &Matrix) -> Matrix {
    let mut result = target.clone();
    softmax_columns(&mut result);
    result
}

pub fn softmax_into(target: &Matrix, dest: &mut Matrix) -> Result<()> {
    check_same_shape(target, dest, "softmax_into")?;
    target.copy_to(dest)?;
    softmax_columns(dest);
    Ok(())
}

fn softmax_columns(m: &mut Matrix) {
    let (rows, cols) = m.shape();
    let data = m.as_mut_slice();
    for j in 0..cols {
        // Shifting by the column max leaves the result unchanged and keeps
        // exp() finite.
        let max = (0..rows)
            .map(|i| data[i * cols + j])
            .fold(f64::NEG_INFINITY, f64::max);
        let mut total = 0.0;
        for i in 0..rows {
            let e = (data[i * cols + j] - max).exp();
            data[i * cols + j] = e;
            total += e;
        }
        for i in 0..rows {
            data[i * cols + j] *= 1.0 / total;
        }
    }
}

fn check_same_shape(target: &Matrix, dest: &Matrix, op: &'static str) -> Result<()> {
    if target.shape() == dest.shape() {
        return Ok(());
    }
    error!("{op}: incorrect destination matrix size provided");
    Err(NnError::DimensionMismatch {
        op,
        left_rows: target.rows(),
        left_cols: target.cols(),
        right_rows: dest.rows(),
        right_cols: dest.cols(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sigmoid_is_bounded_and_increasing() {
        let points = [-30.0, -5.0, -1.0, -0.1, 0.0, 0.1, 1.0, 5.0, 30.0];
        for w in points.windows(2) {
            let (a, b) = (sigmoid(w[0]), sigmoid(w[1]));
            assert!(a > 0.0 && a < 1.0);
            assert!(b > 0.0 && b < 1.0);
            assert!(b > a);
        }
        assert_eq!(sigmoid(0.0), 0.5);
    }

    #[test]
    fn sigmoid_prime_matches_definition() {
        let z = Matrix::from_vec(2, 2, vec![-2.0, 0.0, 0.5, 3.0]).unwrap();
        let sp = sigmoid_prime(&z);
        let mut into = Matrix::zeros(2, 2);
        sigmoid_prime_into(&z, &mut into).unwrap();
        for (i, &x) in z.as_slice().iter().enumerate() {
            let expected = sigmoid(x) * (1.0 - sigmoid(x));
            assert_abs_diff_eq!(sp.as_slice()[i], expected, epsilon = 1e-15);
            assert_abs_diff_eq!(into.as_slice()[i], expected, epsilon = 1e-15);
        }
        assert_eq!(sp.get(0, 1).unwrap(), 0.25);
    }

    #[test]
    fn sigmoid_prime_into_rejects_other_shapes() {
        let z = Matrix::zeros(2, 2);
        let mut dest = Matrix::zeros(4, 1);
        assert!(sigmoid_prime_into(&z, &mut dest).is_err());
    }

    #[test]
    fn softmax_columns_sum_to_one() {
        let m = Matrix::from_vec(3, 3, vec![1.0, -50.0, 700.0, 2.0, 0.0, 710.0, 3.0, 50.0, -710.0])
            .unwrap();
        let s = softmax(&m);
        for j in 0..3 {
            let total: f64 = (0..3).map(|i| s.get(i, j).unwrap()).sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        }
        // Column 0 of (1, 2, 3) is the textbook case.
        let e: f64 = 1f64.exp() + 2f64.exp() + 3f64.exp();
        assert_abs_diff_eq!(s.get(2, 0).unwrap(), 3f64.exp() / e, epsilon = 1e-12);
    }

    #[test]
    fn softmax_into_checks_shape() {
        let m = Matrix::from_vec(2, 1, vec![0.0, 0.0]).unwrap();
        let mut dest = Matrix::zeros(2, 1);
        softmax_into(&m, &mut dest).unwrap();
        assert_eq!(dest.as_slice(), &[0.5, 0.5]);
        let mut wrong = Matrix::zeros(1, 2);
        assert!(softmax_into(&m, &mut wrong).is_err());
    }
}
