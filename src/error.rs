/// Failure kinds surfaced by the incremental solver. `update` is
/// transactional: any `Err` leaves the `ISAM2` instance exactly as it was
/// before the call.
#[derive(Debug, thiserror::Error)]
pub enum Isam2Error {
    /// A caller supplied malformed input: a key already present in
    /// `Values`, a key missing from `newValues`, a `newValues` key not
    /// referenced by any factor in `newFactors`, or an unknown factor
    /// index to remove. No state was mutated.
    #[error("precondition violation: {reason}")]
    PreconditionViolation { reason: String },

    /// LDL-eliminating a clique hit a non-positive pivot and the
    /// transparent retry under QR also failed (or QR itself produced a
    /// rank-deficient system).
    #[error("indefinite linear system encountered during elimination")]
    IndefiniteLinearSystem,

    /// Back-substitution produced a non-finite delta.
    #[error("numerical overflow in linear delta")]
    NumericalOverflow,

    /// An internal invariant (running intersection, coverage) was found
    /// broken after reattaching cliques. Not recoverable: indicates a bug
    /// in the engine itself rather than bad input.
    #[error("internal invariant violated: {reason}")]
    InvariantViolation { reason: String },
}
