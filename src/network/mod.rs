pub mod network;
pub mod persist;
pub mod spec;

pub use network::{BiasExpansion, Network};
pub use spec::NetworkSpec;
