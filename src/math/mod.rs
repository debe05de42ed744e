pub mod matrix;

pub use matrix::{Element, Matrix, Orientation};
