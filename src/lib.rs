pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod loss;
pub mod optim;
pub mod network;
pub mod data;
pub mod train;

// Convenience re-exports
pub use error::{NnError, Result};
pub use math::matrix::{Matrix, Orientation};
pub use layers::dense::{Layer, Slot};
pub use loss::loss_type::CostFunction;
pub use network::network::Network;
pub use network::spec::NetworkSpec;
pub use optim::sgd::Sgd;
pub use data::idx::{MnistImages, MnistLabels};
pub use train::{evaluate, train_network, EpochStats, Evaluation, TrainConfig};
