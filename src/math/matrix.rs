use std::fmt;

use log::{debug, error};
use num_traits::{Num, Signed};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};

/// Numeric types a [`Matrix`] can hold.
pub trait Element: Num + Copy + PartialOrd + fmt::Debug + fmt::Display {}

impl<T> Element for T where T: Num + Copy + PartialOrd + fmt::Debug + fmt::Display {}

/// Selects a row or a column slice of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Row,
    Column,
}

#[derive(Debug, Clone, Copy)]
enum ElementOp {
    Add,
    Subtract,
    Multiply,
}

impl ElementOp {
    fn apply<T: Element>(self, a: T, b: T) -> T {
        match self {
            ElementOp::Add => a + b,
            ElementOp::Subtract => a - b,
            ElementOp::Multiply => a * b,
        }
    }
}

/// Dense row-major matrix.
///
/// The backing buffer always holds exactly `rows * cols` elements. Operations
/// that reshape (`flatten`, `transpose_self`, the `_into` variants) update both
/// dimensions together with the buffer layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "RawMatrix<T>",
    bound(deserialize = "T: Element + Deserialize<'de>")
)]
pub struct Matrix<T = f64> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

/// Wire form of a [`Matrix`] before its buffer length is checked.
#[derive(Deserialize)]
struct RawMatrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Element> TryFrom<RawMatrix<T>> for Matrix<T> {
    type Error = NnError;

    fn try_from(raw: RawMatrix<T>) -> Result<Matrix<T>> {
        Matrix::from_vec(raw.rows, raw.cols, raw.data)
    }
}

impl<T: Element> Matrix<T> {
    pub fn zeros(rows: usize, cols: usize) -> Matrix<T> {
        Matrix::filled(rows, cols, T::zero())
    }

    pub fn filled(rows: usize, cols: usize, value: T) -> Matrix<T> {
        Matrix {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Wraps a row-major buffer. Fails unless `data.len() == rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Matrix<T>> {
        let Some(expected) = rows.checked_mul(cols) else {
            error!("Matrix::from_vec: [{rows} x {cols}] overflows");
            return Err(NnError::InvalidConfig(format!("matrix [{rows} x {cols}] overflows")));
        };
        if data.len() != expected {
            error!("Matrix::from_vec: buffer does not match [{rows} x {cols}]");
            return Err(NnError::SizeMismatch {
                op: "Matrix::from_vec",
                expected,
                got: data.len(),
            });
        }
        Ok(Matrix { rows, cols, data })
    }

    /// Builds a matrix from nested rows. Every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Matrix<T>> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            if row.len() != n_cols {
                return Err(NnError::SizeMismatch {
                    op: "Matrix::from_rows",
                    expected: n_cols,
                    got: row.len(),
                });
            }
            data.extend(row);
        }
        Ok(Matrix {
            rows: n_rows,
            cols: n_cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of stored elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn exists(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Result<T> {
        self.check_index(row, col, "Matrix::get")?;
        Ok(self.data[row * self.cols + col])
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        self.check_index(row, col, "Matrix::set")?;
        self.data[row * self.cols + col] = value;
        Ok(())
    }

    /// Overwrites every element with `value`.
    pub fn populate(&mut self, value: T) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    // ── Reductions ──────────────────────────────────────────────────────────

    pub fn max(&self) -> Result<T> {
        self.reduce("Matrix::max", |best, x| if x > best { x } else { best })
    }

    pub fn min(&self) -> Result<T> {
        self.reduce("Matrix::min", |best, x| if x < best { x } else { best })
    }

    /// Maximum of a single row or column.
    pub fn max_along(&self, orientation: Orientation, index: usize) -> Result<T> {
        let slice = self.slice_values(orientation, index, "Matrix::max_along")?;
        Ok(slice
            .into_iter()
            .fold(None, |best: Option<T>, x| match best {
                Some(b) if b >= x => Some(b),
                _ => Some(x),
            })
            .unwrap_or_else(T::zero))
    }

    /// Minimum of a single row or column.
    pub fn min_along(&self, orientation: Orientation, index: usize) -> Result<T> {
        let slice = self.slice_values(orientation, index, "Matrix::min_along")?;
        Ok(slice
            .into_iter()
            .fold(None, |best: Option<T>, x| match best {
                Some(b) if b <= x => Some(b),
                _ => Some(x),
            })
            .unwrap_or_else(T::zero))
    }

    pub fn sum(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, &x| acc + x)
    }

    /// Position of the maximum value within row or column `index`.
    ///
    /// For a 1×N or N×1 matrix the whole vector is searched and `index` is
    /// ignored. Otherwise the requested row or column is extracted first. Ties
    /// resolve to the first occurrence.
    pub fn max_idx(&self, orientation: Orientation, index: usize) -> Result<usize> {
        if self.is_empty() {
            return Err(NnError::EmptyMatrix { op: "Matrix::max_idx" });
        }

        if self.rows == 1 || self.cols == 1 {
            let max_value = self.max()?;
            return Ok(self
                .data
                .iter()
                .position(|&x| x == max_value)
                .unwrap_or(0));
        }

        let search = match orientation {
            Orientation::Row => self.get_row(index)?,
            Orientation::Column => self.get_column(index)?,
        };
        search.max_idx(orientation, 0)
    }

    // ── Linear algebra ──────────────────────────────────────────────────────

    /// Naive matrix product `self · rhs`.
    pub fn dot(&self, rhs: &Matrix<T>) -> Result<Matrix<T>> {
        self.check_dot(rhs, "Matrix::dot")?;
        let mut result = Matrix::zeros(self.rows, rhs.cols);
        self.dot_unchecked(rhs, &mut result);
        Ok(result)
    }

    /// Matrix product written into `dest`, which must already be
    /// `[self.rows x rhs.cols]`.
    pub fn dot_into(&self, rhs: &Matrix<T>, dest: &mut Matrix<T>) -> Result<()> {
        self.check_dot(rhs, "Matrix::dot_into")?;
        if dest.rows != self.rows || dest.cols != rhs.cols {
            error!("Matrix::dot_into: destination has the wrong dimensions");
            return Err(NnError::DimensionMismatch {
                op: "Matrix::dot_into",
                left_rows: dest.rows,
                left_cols: dest.cols,
                right_rows: self.rows,
                right_cols: rhs.cols,
            });
        }
        self.dot_unchecked(rhs, dest);
        Ok(())
    }

    fn dot_unchecked(&self, rhs: &Matrix<T>, dest: &mut Matrix<T>) {
        for i in 0..self.rows {
            for j in 0..rhs.cols {
                let mut sum = T::zero();
                for k in 0..self.cols {
                    sum = sum + self.data[i * self.cols + k] * rhs.data[k * rhs.cols + j];
                }
                dest.data[i * rhs.cols + j] = sum;
            }
        }
    }

    pub fn transpose(&self) -> Matrix<T> {
        let mut result = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                result.data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        result
    }

    /// Transposes in place, reading from a full copy of the original buffer.
    pub fn transpose_self(&mut self) {
        let original = self.clone();
        self.rows = original.cols;
        self.cols = original.rows;
        for i in 0..original.rows {
            for j in 0..original.cols {
                self.data[j * self.cols + i] = original.data[i * original.cols + j];
            }
        }
    }

    /// Reinterprets the buffer as a single row or a single column without
    /// moving any element.
    pub fn flatten(&mut self, orientation: Orientation) {
        let n = self.rows * self.cols;
        match orientation {
            Orientation::Row => {
                self.rows = 1;
                self.cols = n;
            }
            Orientation::Column => {
                self.rows = n;
                self.cols = 1;
            }
        }
    }

    /// Deep copy into an existing matrix with the same element count; the
    /// destination takes this matrix's shape.
    pub fn copy_to(&self, dest: &mut Matrix<T>) -> Result<()> {
        check_len(self.len(), dest.len(), "Matrix::copy_to")?;
        dest.data.copy_from_slice(&self.data);
        dest.rows = self.rows;
        dest.cols = self.cols;
        Ok(())
    }

    /// Replicates a single-column matrix across `n` columns.
    pub fn broadcast_columns(&self, n: usize) -> Result<Matrix<T>> {
        if self.cols != 1 {
            error!("Matrix::broadcast_columns: source must be a single column");
            return Err(NnError::DimensionMismatch {
                op: "Matrix::broadcast_columns",
                left_rows: self.rows,
                left_cols: self.cols,
                right_rows: self.rows,
                right_cols: 1,
            });
        }
        let mut result = Matrix::zeros(self.rows, n);
        for i in 0..self.rows {
            for j in 0..n {
                result.data[i * n + j] = self.data[i];
            }
        }
        Ok(result)
    }

    // ── Elementwise arithmetic ──────────────────────────────────────────────

    pub fn add(&self, rhs: &Matrix<T>) -> Result<Matrix<T>> {
        self.element_op(rhs, ElementOp::Add, "Matrix::add")
    }

    pub fn add_into(&self, rhs: &Matrix<T>, dest: &mut Matrix<T>) -> Result<()> {
        self.element_op_into(rhs, dest, ElementOp::Add, "Matrix::add_into")
    }

    pub fn add_in_place(&mut self, rhs: &Matrix<T>) -> Result<()> {
        self.element_op_in_place(rhs, ElementOp::Add, "Matrix::add_in_place")
    }

    pub fn subtract(&self, rhs: &Matrix<T>) -> Result<Matrix<T>> {
        self.element_op(rhs, ElementOp::Subtract, "Matrix::subtract")
    }

    pub fn subtract_into(&self, rhs: &Matrix<T>, dest: &mut Matrix<T>) -> Result<()> {
        self.element_op_into(rhs, dest, ElementOp::Subtract, "Matrix::subtract_into")
    }

    pub fn subtract_in_place(&mut self, rhs: &Matrix<T>) -> Result<()> {
        self.element_op_in_place(rhs, ElementOp::Subtract, "Matrix::subtract_in_place")
    }

    /// Hadamard (elementwise) product.
    pub fn multiply(&self, rhs: &Matrix<T>) -> Result<Matrix<T>> {
        self.element_op(rhs, ElementOp::Multiply, "Matrix::multiply")
    }

    pub fn multiply_into(&self, rhs: &Matrix<T>, dest: &mut Matrix<T>) -> Result<()> {
        self.element_op_into(rhs, dest, ElementOp::Multiply, "Matrix::multiply_into")
    }

    pub fn multiply_in_place(&mut self, rhs: &Matrix<T>) -> Result<()> {
        self.element_op_in_place(rhs, ElementOp::Multiply, "Matrix::multiply_in_place")
    }

    fn element_op(&self, rhs: &Matrix<T>, op: ElementOp, name: &'static str) -> Result<Matrix<T>> {
        self.check_dimensions(rhs, name)?;
        let data = self
            .data
            .iter()
            .zip(rhs.data.iter())
            .map(|(&a, &b)| op.apply(a, b))
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    fn element_op_into(
        &self,
        rhs: &Matrix<T>,
        dest: &mut Matrix<T>,
        op: ElementOp,
        name: &'static str,
    ) -> Result<()> {
        self.check_dimensions(rhs, name)?;
        check_len(self.len(), dest.len(), name)?;
        dest.rows = self.rows;
        dest.cols = self.cols;
        for ((d, &a), &b) in dest.data.iter_mut().zip(&self.data).zip(&rhs.data) {
            *d = op.apply(a, b);
        }
        Ok(())
    }

    fn element_op_in_place(&mut self, rhs: &Matrix<T>, op: ElementOp, name: &'static str) -> Result<()> {
        self.check_dimensions(rhs, name)?;
        for (a, &b) in self.data.iter_mut().zip(&rhs.data) {
            *a = op.apply(*a, b);
        }
        Ok(())
    }

    // ── Scalar arithmetic ───────────────────────────────────────────────────

    pub fn scale(&self, value: T) -> Matrix<T> {
        self.apply(|x| x * value)
    }

    pub fn scale_into(&self, value: T, dest: &mut Matrix<T>) -> Result<()> {
        self.apply_into(|x| x * value, dest)
    }

    pub fn scale_in_place(&mut self, value: T) {
        self.apply_in_place(|x| x * value);
    }

    pub fn add_scalar(&self, value: T) -> Matrix<T> {
        self.apply(|x| x + value)
    }

    pub fn add_scalar_into(&self, value: T, dest: &mut Matrix<T>) -> Result<()> {
        self.apply_into(|x| x + value, dest)
    }

    pub fn add_scalar_in_place(&mut self, value: T) {
        self.apply_in_place(|x| x + value);
    }

    // ── Function application ────────────────────────────────────────────────

    pub fn apply<F: Fn(T) -> T>(&self, func: F) -> Matrix<T> {
        let mut result = self.clone();
        result.apply_in_place(func);
        result
    }

    pub fn apply_into<F: Fn(T) -> T>(&self, func: F, dest: &mut Matrix<T>) -> Result<()> {
        self.copy_to(dest)?;
        dest.apply_in_place(func);
        Ok(())
    }

    pub fn apply_in_place<F: Fn(T) -> T>(&mut self, func: F) {
        self.data.iter_mut().for_each(|x| *x = func(*x));
    }

    /// Maps `func(x, param)` over every element.
    pub fn apply_second<F: Fn(T, T) -> T>(&self, func: F, param: T) -> Matrix<T> {
        self.apply(|x| func(x, param))
    }

    pub fn apply_second_into<F: Fn(T, T) -> T>(&self, func: F, param: T, dest: &mut Matrix<T>) -> Result<()> {
        self.apply_into(|x| func(x, param), dest)
    }

    pub fn apply_second_in_place<F: Fn(T, T) -> T>(&mut self, func: F, param: T) {
        self.apply_in_place(|x| func(x, param));
    }

    pub fn apply_row_in_place<F: Fn(T) -> T>(&mut self, func: F, row: usize) -> Result<()> {
        self.check_index(row, 0, "Matrix::apply_row_in_place")?;
        let start = row * self.cols;
        self.data[start..start + self.cols]
            .iter_mut()
            .for_each(|x| *x = func(*x));
        Ok(())
    }

    pub fn apply_second_row_in_place<F: Fn(T, T) -> T>(&mut self, func: F, param: T, row: usize) -> Result<()> {
        self.apply_row_in_place(|x| func(x, param), row)
    }

    pub fn apply_column_in_place<F: Fn(T) -> T>(&mut self, func: F, col: usize) -> Result<()> {
        self.check_index(0, col, "Matrix::apply_column_in_place")?;
        for i in 0..self.rows {
            let idx = i * self.cols + col;
            self.data[idx] = func(self.data[idx]);
        }
        Ok(())
    }

    pub fn apply_second_column_in_place<F: Fn(T, T) -> T>(
        &mut self,
        func: F,
        param: T,
        col: usize,
    ) -> Result<()> {
        self.apply_column_in_place(|x| func(x, param), col)
    }

    // ── Slicing ─────────────────────────────────────────────────────────────

    /// Copies row `row` into a new 1×cols matrix.
    pub fn get_row(&self, row: usize) -> Result<Matrix<T>> {
        let mut result = Matrix::zeros(1, self.cols);
        self.get_row_into(row, &mut result)?;
        Ok(result)
    }

    /// Copies row `row` into `dest`, which must hold exactly `cols` elements.
    /// `dest` is reshaped to 1×cols.
    pub fn get_row_into(&self, row: usize, dest: &mut Matrix<T>) -> Result<()> {
        self.check_index(row, 0, "Matrix::get_row_into")?;
        check_len(self.cols, dest.len(), "Matrix::get_row_into")?;
        dest.rows = 1;
        dest.cols = self.cols;
        let start = row * self.cols;
        dest.data.copy_from_slice(&self.data[start..start + self.cols]);
        Ok(())
    }

    /// Copies column `col` into a new rows×1 matrix.
    pub fn get_column(&self, col: usize) -> Result<Matrix<T>> {
        let mut result = Matrix::zeros(self.rows, 1);
        self.get_column_into(col, &mut result)?;
        Ok(result)
    }

    /// Copies column `col` into `dest`, which must hold exactly `rows`
    /// elements. `dest` is reshaped to rows×1.
    pub fn get_column_into(&self, col: usize, dest: &mut Matrix<T>) -> Result<()> {
        self.check_index(0, col, "Matrix::get_column_into")?;
        check_len(self.rows, dest.len(), "Matrix::get_column_into")?;
        dest.rows = self.rows;
        dest.cols = 1;
        for i in 0..self.rows {
            dest.data[i] = self.data[i * self.cols + col];
        }
        Ok(())
    }

    // ── Checks ──────────────────────────────────────────────────────────────

    fn check_index(&self, row: usize, col: usize, op: &'static str) -> Result<()> {
        if self.exists(row, col) {
            return Ok(());
        }
        error!("{op}: invalid row or column provided");
        debug!("{op}: requested ({row}, {col}) of [{} x {}]", self.rows, self.cols);
        Err(NnError::IndexOutOfRange {
            op,
            row,
            col,
            rows: self.rows,
            cols: self.cols,
        })
    }

    fn check_dimensions(&self, rhs: &Matrix<T>, op: &'static str) -> Result<()> {
        if self.rows == rhs.rows && self.cols == rhs.cols {
            return Ok(());
        }
        error!("{op}: dimension mismatch");
        debug!(
            "{op}: calling matrix is [{} x {}], other is [{} x {}]",
            self.rows, self.cols, rhs.rows, rhs.cols
        );
        Err(self.mismatch(rhs, op))
    }

    fn check_dot(&self, rhs: &Matrix<T>, op: &'static str) -> Result<()> {
        if self.cols == rhs.rows {
            return Ok(());
        }
        error!("{op}: matrix dimension mismatch, cannot calculate the dot product");
        debug!(
            "{op}: first matrix is [{} x {}], second is [{} x {}]",
            self.rows, self.cols, rhs.rows, rhs.cols
        );
        Err(self.mismatch(rhs, op))
    }

    fn mismatch(&self, rhs: &Matrix<T>, op: &'static str) -> NnError {
        NnError::DimensionMismatch {
            op,
            left_rows: self.rows,
            left_cols: self.cols,
            right_rows: rhs.rows,
            right_cols: rhs.cols,
        }
    }

    fn reduce<F: Fn(T, T) -> T>(&self, op: &'static str, pick: F) -> Result<T> {
        let (first, rest) = self
            .data
            .split_first()
            .ok_or(NnError::EmptyMatrix { op })?;
        Ok(rest.iter().fold(*first, |best, &x| pick(best, x)))
    }

    fn slice_values(&self, orientation: Orientation, index: usize, op: &'static str) -> Result<Vec<T>> {
        match orientation {
            Orientation::Row => {
                self.check_index(index, 0, op)?;
                let start = index * self.cols;
                Ok(self.data[start..start + self.cols].to_vec())
            }
            Orientation::Column => {
                self.check_index(0, index, op)?;
                Ok((0..self.rows).map(|i| self.data[i * self.cols + index]).collect())
            }
        }
    }
}

impl<T: Element + Signed> Matrix<T> {
    /// Sum of absolute values.
    pub fn abs_sum(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, x| acc + x.abs())
    }
}

impl Matrix<f64> {
    /// Uniform samples in [-1, 1].
    pub fn random(rows: usize, cols: usize) -> Matrix<f64> {
        Matrix::random_with(rows, cols, &mut rand::thread_rng())
    }

    pub fn random_with<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix<f64> {
        let data = (0..rows * cols).map(|_| rng.gen_range(-1.0..=1.0)).collect();
        Matrix { rows, cols, data }
    }
}

impl<T: Element> fmt::Display for Matrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.rows {
            write!(f, "[{i}]:\t")?;
            for j in 0..self.cols {
                write!(f, "{} ", self.data[i * self.cols + j])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn check_len(expected: usize, got: usize, op: &'static str) -> Result<()> {
    if expected == got {
        return Ok(());
    }
    error!("{op}: underlying data sizes do not match");
    debug!("{op}: source holds {expected} elements, destination holds {got}");
    Err(NnError::SizeMismatch { op, expected, got })
}
