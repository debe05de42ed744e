pub mod idx;

pub use idx::{MnistImages, MnistLabels};
