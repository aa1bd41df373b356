use crate::bayes_tree::{BayesTree, CliqueId};
use crate::factor::NonlinearFactorGraph;
use crate::isam2::params::{DoglegAdaptationMode, DoglegParams};
use crate::isam2::wildfire::wildfire_update;
use crate::key::Key;
use crate::ordering::Ordering;
use crate::values::Values;
use crate::vector_values::VectorValues;
use nalgebra::DVector;

/// Powell's dog-leg trust-region step. See spec.md §4.I.
pub struct DoglegOutcome {
    pub step: VectorValues,
    pub last_backsub_variable_count: usize,
    pub new_radius: f64,
    pub accepted: bool,
}

pub fn step(
    tree: &BayesTree,
    ordering: &Ordering,
    replaced_mask: &mut [bool],
    gauss_newton_delta: &mut VectorValues,
    graph: &NonlinearFactorGraph,
    values: &Values,
    current_radius: f64,
    params: &DoglegParams,
) -> DoglegOutcome {
    let count = wildfire_update(tree, ordering, replaced_mask, gauss_newton_delta, params.wildfire_threshold);

    let g = assemble_gradient(tree, ordering, gauss_newton_delta);
    let rg_sq = quadratic_form(tree, ordering, &g);
    let gtg = g.dot(&g);
    let alpha = if rg_sq > 1e-300 { gtg / rg_sq } else { 0.0 };
    let steepest_descent = g.scale(-alpha);

    let gn_norm = gauss_newton_delta.norm();
    let sd_norm = steepest_descent.norm();

    let dogleg_step = if gn_norm <= current_radius {
        gauss_newton_delta.clone()
    } else if sd_norm >= current_radius {
        steepest_descent.scale(current_radius / sd_norm.max(1e-300))
    } else {
        let diff = gauss_newton_delta.sub(&steepest_descent);
        let a = diff.dot(&diff);
        let b = 2.0 * steepest_descent.dot(&diff);
        let c = steepest_descent.dot(&steepest_descent) - current_radius * current_radius;
        let discriminant = (b * b - 4.0 * a * c).max(0.0);
        let tau = if a > 1e-300 { (-b + discriminant.sqrt()) / (2.0 * a) } else { 0.0 };
        steepest_descent.add(&diff.scale(tau))
    };

    let error_before = graph.total_error(values);
    let candidate = crate::isam2::retracted_values(values, ordering, &dogleg_step);
    let error_after = graph.total_error(&candidate);
    let actual_decrease = error_before - error_after;
    let predicted_decrease = g.dot(&dogleg_step) - 0.5 * quadratic_form(tree, ordering, &dogleg_step);
    let gain_ratio = if predicted_decrease.abs() > 1e-300 {
        actual_decrease / predicted_decrease
    } else {
        0.0
    };

    let accepted = gain_ratio > 0.0;
    let new_radius = match params.adaptation_mode {
        DoglegAdaptationMode::Standard => {
            if gain_ratio < 0.25 {
                current_radius * 0.25
            } else if gain_ratio > 0.75 {
                current_radius * 2.0
            } else {
                current_radius
            }
        }
    };

    if !accepted {
        log::warn!("dogleg: rejected step (gain ratio {gain_ratio:.3}), shrinking radius {current_radius:.3e} -> {new_radius:.3e}");
    } else if params.verbose {
        log::debug!("dogleg: accepted step (gain ratio {gain_ratio:.3}), radius {current_radius:.3e} -> {new_radius:.3e}");
    }

    DoglegOutcome {
        step: dogleg_step,
        last_backsub_variable_count: count,
        new_radius,
        accepted,
    }
}

/// Whole-tree gradient, assembled in slot space by scattering each
/// clique's cached contribution into its frontal/separator slots.
fn assemble_gradient(tree: &BayesTree, ordering: &Ordering, like: &VectorValues) -> VectorValues {
    let mut g = like.zeros_like();
    for id in tree.traversal() {
        scatter_clique_gradient(tree, id, ordering, &mut g);
    }
    g
}

fn scatter_clique_gradient(tree: &BayesTree, id: CliqueId, ordering: &Ordering, g: &mut VectorValues) {
    let clique = tree.get(id);
    scatter_add(g, ordering, clique.frontals(), &clique.gradient_frontal);
    scatter_add(g, ordering, clique.separator(), &clique.gradient_separator);
}

fn scatter_add(g: &mut VectorValues, ordering: &Ordering, keys: &[Key], values: &DVector<f64>) {
    let mut offset = 0;
    for &key in keys {
        let slot = ordering.slot(key).expect("key missing from ordering");
        let d = g.dim(slot);
        let updated = g.get(slot).clone_owned() + values.rows(offset, d);
        g.set(slot, &updated);
        offset += d;
    }
}

fn gather(x: &VectorValues, ordering: &Ordering, keys: &[Key]) -> DVector<f64> {
    let total_dim: usize = keys.iter().map(|&k| x.dim(ordering.slot(k).expect("key missing from ordering"))).sum();
    let mut out = DVector::zeros(total_dim);
    let mut offset = 0;
    for &key in keys {
        let slot = ordering.slot(key).expect("key missing from ordering");
        let d = x.dim(slot);
        out.rows_mut(offset, d).copy_from(&x.get(slot));
        offset += d;
    }
    out
}

/// `Σ_cliques ‖ R_i x_Fi + S_i x_Si ‖²`, the quadratic form `xᵀΛx` assembled
/// clique-by-clique without ever materializing the global information
/// matrix Λ. Used both for the dog-leg curvature term (`x = g`) and for
/// the predicted-decrease model (`x` = the candidate step).
fn quadratic_form(tree: &BayesTree, ordering: &Ordering, x: &VectorValues) -> f64 {
    let mut total = 0.0;
    for id in tree.traversal() {
        let clique = tree.get(id);
        let x_frontal = gather(x, ordering, clique.frontals());
        let mut rx = &clique.conditional.r * &x_frontal;
        if clique.conditional.separator_dim() > 0 {
            let x_sep = gather(x, ordering, clique.separator());
            rx += &clique.conditional.s * &x_sep;
        }
        total += rx.norm_squared();
    }
    total
}
