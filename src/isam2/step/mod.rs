pub mod dogleg;
pub mod gauss_newton;

pub use dogleg::DoglegOutcome;
pub use gauss_newton::GaussNewtonOutcome;
