//! # ct_tensor - Tensors with Reverse-Mode Autodiff
//!
//! This crate provides a small CPU tensor engine: N-dimensional `f32`
//! arrays over reference-counted buffers, elementwise and matrix arithmetic
//! with broadcasting, and a dynamic computation graph that the backward pass
//! walks to accumulate gradients in place.
//!
//! ## Overview
//!
//! The core abstractions are:
//! - [`Shape`] - Fixed-capacity tensor shape (up to [`MAX_DIMS`] dims)
//! - [`Buffer`] - Flat storage shared by tensor aliases
//! - [`Tensor`] - Shape + shared buffer + optional gradient node
//! - [`GradFn`] - Local-derivative rule recorded by each operator
//! - [`TensorError`] - Failures of shape checks and graph invariants
//!
//! ## Example
//!
//! ```
//! use ct_tensor::prelude::*;
//!
//! let x = Tensor::from_vec(vec![1.0, 2.0, 3.0], Shape::new(&[3]), true)?;
//! let y = Tensor::from_vec(vec![4.0, 5.0, 6.0], Shape::new(&[3]), true)?;
//!
//! // z = sum(x * y)
//! let z = x.mul(&y)?.sum()?;
//! z.backward(None)?;
//!
//! assert_eq!(x.grad().unwrap().to_vec(), vec![4.0, 5.0, 6.0]);
//! assert_eq!(y.grad().unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
//! # Ok::<(), TensorError>(())
//! ```

pub mod backward;
pub mod buffer;
pub mod error;
pub mod finite_diff;
mod kernels;
pub mod node;
mod ops;
pub mod shape;

pub use buffer::Buffer;
pub use error::{Result, TensorError};
pub use finite_diff::{finite_diff_grad, max_grad_error};
pub use node::{GradFn, GradNode, Tensor, MAX_INPUTS};
pub use shape::{Shape, MAX_DIMS};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{Result, TensorError};
    pub use crate::finite_diff::{finite_diff_grad, max_grad_error};
    pub use crate::node::{GradFn, Tensor};
    pub use crate::shape::Shape;
}
