//! Operator functions.
//!
//! Every operator computes a fresh result buffer from its operands' values
//! and, when any operand is tracked, records the operands and a [`GradFn`]
//! on the result. Operand buffers are never written.

use tracing::trace;

use crate::error::{Result, TensorError};
use crate::kernels;
use crate::node::{GradFn, Tensor};
use crate::shape::Shape;

fn broadcast_shape(op: &'static str, lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    lhs.broadcast_with(rhs).ok_or(TensorError::ShapeMismatch {
        op,
        lhs: *lhs,
        rhs: *rhs,
    })
}

/// Scalars enter a multiply as `(1,)`.
fn promote_scalar(shape: &Shape) -> Shape {
    if shape.is_scalar() {
        Shape::new(&[1])
    } else {
        *shape
    }
}

impl Tensor {
    /// Add: self + other, with broadcasting.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        let out_shape = broadcast_shape("add", self.shape(), other.shape())?;
        trace!(lhs = %self.shape(), rhs = %other.shape(), out = %out_shape, "add");

        let data = kernels::binary_op_broadcast(
            &self.data(),
            self.shape(),
            &other.data(),
            other.shape(),
            &out_shape,
            |x, y| x + y,
        );
        Ok(Tensor::from_op(data, out_shape, GradFn::Add, &[self, other]))
    }

    /// Multiply: self * other, element-wise with broadcasting.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        let lhs_shape = promote_scalar(self.shape());
        let rhs_shape = promote_scalar(other.shape());
        let out_shape = broadcast_shape("mul", &lhs_shape, &rhs_shape)?;
        trace!(lhs = %lhs_shape, rhs = %rhs_shape, out = %out_shape, "mul");

        let data = kernels::binary_op_broadcast(
            &self.data(),
            &lhs_shape,
            &other.data(),
            &rhs_shape,
            &out_shape,
            |x, y| x * y,
        );
        Ok(Tensor::from_op(data, out_shape, GradFn::Mul, &[self, other]))
    }

    /// Multiply every element by a constant.
    pub fn mul_scalar(&self, value: f32) -> Result<Tensor> {
        let constant = Tensor::full(*self.shape(), value, false);
        self.mul(&constant)
    }

    /// Sum of all elements, as a scalar.
    pub fn sum(&self) -> Result<Tensor> {
        let total = kernels::sum_all(&self.data());
        Ok(Tensor::from_op(vec![total], Shape::scalar(), GradFn::Sum, &[self]))
    }

    /// Mean of all elements, as a scalar.
    pub fn mean(&self) -> Result<Tensor> {
        let total = kernels::sum_all(&self.data());
        let mean = total / self.numel() as f32;
        Ok(Tensor::from_op(vec![mean], Shape::scalar(), GradFn::Mean, &[self]))
    }

    /// Matrix multiplication: self @ other.
    ///
    /// `(..., M, K) @ (K, N)` or `(..., M, K) @ (..., K, N)`; both operands
    /// need rank 2 or more.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        trace!(lhs = %self.shape(), rhs = %other.shape(), "matmul");
        let (data, out_shape) =
            kernels::matmul_impl(&self.data(), self.shape(), &other.data(), other.shape())?;
        Ok(Tensor::from_op(data, out_shape, GradFn::MatMul, &[self, other]))
    }

    /// Index of the maximum along `dim` for every slice. Negative `dim`
    /// counts from the end. Not differentiable.
    pub fn argmax(&self, dim: isize) -> Result<Vec<usize>> {
        let dim = self.shape().normalize_dim(dim)?;
        Ok(kernels::argmax(&self.data(), self.shape(), dim))
    }

    /// Softmax over the last dim.
    pub fn softmax(&self) -> Result<Tensor> {
        if self.shape().is_scalar() {
            return Err(TensorError::RankPrecondition(
                "softmax requires a tensor of rank >= 1".to_string(),
            ));
        }
        let n = self.shape().dim(self.ndim() - 1);
        let data = kernels::softmax_rows(&self.data(), n);
        Ok(Tensor::from_op(data, *self.shape(), GradFn::Softmax, &[self]))
    }
}
