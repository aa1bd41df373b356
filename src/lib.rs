//! Incremental nonlinear least-squares solver over factor graphs, in the
//! Bayes-tree (ISAM2) style: a running MAP estimate is maintained across a
//! stream of new measurements without re-solving the batch problem, by
//! re-eliminating only the minimal affected subtree of a cached clique
//! tree on every update.
//!
//! Concrete nonlinear factors, manifolds, and the fill-reducing symbolic
//! ordering are external collaborators; [`reference`] ships a minimal
//! Euclidean implementation exercised by this crate's own tests.

pub mod bayes_tree;
pub mod clique;
pub mod elimination;
pub mod error;
pub mod factor;
pub mod isam2;
pub mod key;
pub mod linear;
pub mod order;
pub mod ordering;
pub mod reference;
pub mod values;
pub mod variable;
pub mod variable_index;
pub mod vector_values;

pub use error::Isam2Error;
pub use isam2::{ISAM2Params, UpdateResult, VariableDetail, ISAM2};
pub use key::Key;
pub use values::Values;
