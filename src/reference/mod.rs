mod between_factor;
mod prior_factor;
mod vector_variable;

pub use between_factor::BetweenFactor;
pub use prior_factor::PriorFactor;
pub use vector_variable::VectorVariable;
