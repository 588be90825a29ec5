//! Error type shared by every tensor operation.

use thiserror::Error;

use crate::shape::Shape;

/// Failures raised by shape queries, operators and the backward pass.
///
/// All of these are precondition violations: the graph or the call was
/// malformed. Nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    /// Two operands could not be broadcast against each other.
    #[error("{op}: cannot broadcast shapes {lhs} and {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// A dimension index fell outside `[0, ndim)` after normalization.
    #[error("dim {dim} out of range for a tensor of rank {ndim}")]
    DimOutOfRange { dim: isize, ndim: usize },

    /// An operator was called on operands of the wrong rank or with
    /// disagreeing inner dimensions.
    #[error("rank precondition violated: {0}")]
    RankPrecondition(String),

    /// A shape literal had too many dims or a zero-sized dim.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Flat data did not match the element count of its shape.
    #[error("data length {got} does not match shape element count {expected}")]
    DataLength { expected: usize, got: usize },

    /// A single value was requested from a tensor with more than one element.
    #[error("expected a single-element tensor, got shape {0}")]
    NotScalar(Shape),

    /// Internal contract of the autodiff engine was broken.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

pub type Result<T> = std::result::Result<T, TensorError>;
