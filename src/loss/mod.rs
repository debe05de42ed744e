pub mod quadratic;
pub mod cross_entropy;
pub mod loss_type;

pub use quadratic::QuadraticCost;
pub use cross_entropy::CrossEntropyCost;
pub use loss_type::CostFunction;
