use nalgebra::DVector;

use crate::key::Key;
use crate::linear::{GaussianConditional, LinearFactor};
use crate::ordering::Permutation;

/// Index of a [`Clique`] inside a [`crate::bayes_tree::BayesTree`]'s arena.
/// Acts as the non-owning parent handle described in spec.md §9: the tree
/// owns cliques in a `Vec`, and parent/child relations are plain indices
/// rather than `Rc`/`Weak` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CliqueId(pub usize);

/// A node of the Bayes tree: a Gaussian conditional on frontal variables
/// given a separator, plus the cached residual factor and gradient
/// contribution used when this clique's subtree is later torn down or
/// folded into a tree-wide gradient. See spec.md §3 "Clique" / §4.C.
#[derive(Debug, Clone)]
pub struct Clique {
    pub conditional: GaussianConditional,
    /// The joint factor on the separator that summarizes everything below
    /// this clique — `None` exactly when the separator is empty (the
    /// clique is a root and has nothing left to summarize upward).
    pub cached_factor: Option<LinearFactor>,
    pub gradient_frontal: DVector<f64>,
    pub gradient_separator: DVector<f64>,
    pub parent: Option<CliqueId>,
    pub children: Vec<CliqueId>,
}

impl Clique {
    pub fn new(conditional: GaussianConditional, cached_factor: Option<LinearFactor>) -> Self {
        let (gradient_frontal, gradient_separator) = conditional.gradient_contribution();
        Self {
            conditional,
            cached_factor,
            gradient_frontal,
            gradient_separator,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn frontals(&self) -> &[Key] {
        &self.conditional.frontals
    }

    pub fn separator(&self) -> &[Key] {
        &self.conditional.separator
    }

    pub fn clone_deep(&self) -> Self {
        self.clone()
    }

    /// Rewrite frontal/separator slot labels through `inverse`. Cliques in
    /// this crate address variables by their stable [`Key`] rather than a
    /// raw slot integer (spec.md §3's "Slot" is only materialized when
    /// building [`crate::vector_values::VectorValues`]), so renumbering the
    /// global ordering never requires touching a clique's own conditional
    /// or cached factor — this is a deliberate representational choice,
    /// kept as an explicit no-op method so the operation named in spec.md
    /// §4.C still has call sites to hang future slot-indexed storage off
    /// of.
    pub fn permute_with_inverse(&mut self, _inverse: &Permutation) {}

    /// As [`Clique::permute_with_inverse`] but only the separator; returns
    /// whether anything changed (used upstream to decide whether the
    /// cached factor also needs permuting). Always `false` under the
    /// key-addressed representation.
    pub fn permute_separator_with_inverse(&mut self, _inverse: &Permutation) -> bool {
        false
    }
}
