pub mod dense;

pub use dense::{Layer, Slot};
