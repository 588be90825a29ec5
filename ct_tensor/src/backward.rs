//! Reverse-mode automatic differentiation over the gradient-node graph.
//!
//! The backward pass walks from the root through every recorded input:
//! 1. accumulate the incoming gradient into the node's stored `grad`
//! 2. ask the node's [`GradFn`] for the local derivative w.r.t. each input
//! 3. chain the incoming gradient with it and continue into that input
//!
//! Nothing is memoized. A tensor reachable along several paths is visited
//! once per path, and its stored gradient sums the contributions.

use tracing::debug;

use crate::error::{Result, TensorError};
use crate::kernels;
use crate::node::{GradFn, Tensor, MAX_INPUTS};
use crate::shape::Shape;

/// Propagate `seed` (or a unit seed for single-element roots) through the
/// graph rooted at `root`.
pub fn backward(root: &Tensor, seed: Option<Tensor>) -> Result<()> {
    if !root.requires_grad() {
        return Ok(());
    }

    let seed = match seed {
        Some(seed) => seed,
        None if root.numel() == 1 => Tensor::ones(Shape::scalar(), false),
        None => {
            return Err(TensorError::Invariant(
                "backward without a seed needs a single-element root",
            ))
        }
    };
    if seed.requires_grad() {
        return Err(TensorError::Invariant("backward seed must not require grad"));
    }

    // Explicit stack in place of recursion. Inputs are pushed in reverse so
    // input 0's subtree is finished before input 1 is visited.
    let mut stack = vec![(root.clone(), seed)];
    while let Some((tensor, grad)) = stack.pop() {
        let Some(node) = tensor.node() else {
            continue;
        };

        let (grad_fn, inputs) = {
            let mut node = node.borrow_mut();
            let accumulated = match &node.grad {
                None => grad.clone(),
                Some(existing) => existing.add(&grad)?,
            };
            node.grad = Some(accumulated);
            (node.grad_fn, node.inputs.clone())
        };
        debug!(shape = %tensor.shape(), grad_fn = ?grad_fn, "backward visit");

        let Some(grad_fn) = grad_fn else {
            continue;
        };

        let mut downstream = Vec::with_capacity(MAX_INPUTS);
        for (i, input) in inputs.iter().enumerate() {
            let Some(input) = input else {
                continue;
            };
            if !input.requires_grad() {
                continue;
            }
            let local = local_gradient(grad_fn, &tensor, &inputs, i)?;
            let chained = chain(&grad, &local)?;
            downstream.push((input.clone(), reduce_to(chained, input.shape())));
        }
        stack.extend(downstream.into_iter().rev());
    }

    Ok(())
}

/// Visit every tracked tensor reachable from `root` in the same pre-order
/// the backward pass uses. Untracked tensors end a branch without a visit.
pub fn backward_apply<F>(root: &Tensor, mut visitor: F) -> usize
where
    F: FnMut(&Tensor),
{
    let mut count = 0;
    let mut stack = vec![root.clone()];
    while let Some(tensor) = stack.pop() {
        let Some(node) = tensor.node() else {
            continue;
        };
        visitor(&tensor);
        count += 1;

        let node = node.borrow();
        let inputs: Vec<Tensor> = node.inputs().cloned().collect();
        stack.extend(inputs.into_iter().rev());
    }
    count
}

/// Local derivative of `owner` with respect to its input `i`.
fn local_gradient(
    grad_fn: GradFn,
    owner: &Tensor,
    inputs: &[Option<Tensor>; MAX_INPUTS],
    i: usize,
) -> Result<Tensor> {
    let input = |k: usize| {
        inputs[k]
            .as_ref()
            .ok_or(TensorError::Invariant("gradient node is missing an input"))
    };

    match grad_fn {
        // d(a+b)/da = 1, d(a+b)/db = 1
        GradFn::Add => Ok(Tensor::ones(*input(i)?.shape(), false)),

        // d(a*b)/da = b, d(a*b)/db = a
        GradFn::Mul => Ok(input(1 - i)?.detach()),

        GradFn::Sum => Ok(Tensor::ones(*input(i)?.shape(), false)),

        GradFn::Mean => {
            let x = input(i)?;
            Ok(Tensor::full(*x.shape(), 1.0 / x.numel() as f32, false))
        }

        // Re-runs the product on detached operands rather than forming the
        // transposed chain-rule terms.
        GradFn::MatMul => input(i)?.detach().matmul(&input(1 - i)?.detach()),

        GradFn::Softmax => {
            let n = owner.shape().dim(owner.ndim() - 1);
            let shape = owner.shape().push(n).ok_or_else(|| {
                TensorError::RankPrecondition(format!(
                    "softmax jacobian of {} exceeds the maximum rank",
                    owner.shape()
                ))
            })?;
            Ok(Tensor::from_parts(kernels::softmax_jacobian(&owner.data(), n), shape))
        }
    }
}

/// Combine an incoming gradient with a local derivative.
///
/// A local derivative one rank above a non-scalar gradient is read as a
/// per-row dense Jacobian (the softmax shape); everything else is an
/// element-wise product.
fn chain(grad: &Tensor, local: &Tensor) -> Result<Tensor> {
    if local.ndim() == grad.ndim() + 1 && !grad.shape().is_scalar() {
        softmax_correction(grad, local)
    } else {
        grad.mul(local)
    }
}

/// Contract a gradient of shape `(..., N)` with a Jacobian of shape
/// `(..., N, N)`: view the gradient as `(..., 1, N)`, multiply, and sum over
/// the last dim.
///
/// This is a narrow heuristic keyed on the rank difference alone, not a
/// general Jacobian-vector product.
fn softmax_correction(grad: &Tensor, local: &Tensor) -> Result<Tensor> {
    let last = grad.ndim() - 1;
    let n = grad.shape().dim(last);
    let expanded = grad.shape().with_dim(last, 1).push(n).ok_or_else(|| {
        TensorError::RankPrecondition(format!(
            "cannot expand gradient of shape {} for a jacobian",
            grad.shape()
        ))
    })?;
    debug!(grad = %grad.shape(), local = %local.shape(), "softmax-shaped correction");

    let product = grad.view_as(expanded).mul(local)?;
    let row = product.shape().dim(product.ndim() - 1);
    let reduced = kernels::sum_last_dim(&product.data(), row);
    if reduced.len() != grad.numel() {
        return Err(TensorError::ShapeMismatch {
            op: "backward",
            lhs: *grad.shape(),
            rhs: *local.shape(),
        });
    }
    Ok(Tensor::from_parts(reduced, *grad.shape()))
}

/// Sum a gradient back down to the shape of an operand that was broadcast
/// in the forward pass. Gradients whose shape the operand does not
/// broadcast to pass through unchanged.
fn reduce_to(grad: Tensor, target: &Shape) -> Tensor {
    if grad.shape() == target {
        return grad;
    }
    if grad.numel() == target.numel() {
        return grad.view_as(*target);
    }
    if target.broadcast_with(grad.shape()) != Some(*grad.shape()) {
        return grad;
    }
    let data = kernels::sum_to(&grad.data(), grad.shape(), target);
    Tensor::from_parts(data, *target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(data: &[f32], dims: &[usize], requires_grad: bool) -> Tensor {
        Tensor::from_vec(data.to_vec(), Shape::new(dims), requires_grad).unwrap()
    }

    #[test]
    fn test_untracked_root_is_noop() {
        let x = tensor(&[1.0, 2.0], &[2], false);
        assert_eq!(x.sum().unwrap().backward(None), Ok(()));
        assert!(x.grad().is_none());
    }

    #[test]
    fn test_seedless_backward_needs_single_element() {
        let x = tensor(&[1.0, 2.0], &[2], true);
        let y = x.mul_scalar(2.0).unwrap();
        assert!(matches!(y.backward(None), Err(TensorError::Invariant(_))));
        assert!(x.grad().is_none());
    }

    #[test]
    fn test_tracked_seed_rejected() {
        let x = tensor(&[1.0, 2.0], &[2], true);
        let seed = Tensor::ones(Shape::new(&[2]), true);
        assert!(matches!(x.backward(Some(seed)), Err(TensorError::Invariant(_))));
    }

    #[test]
    fn test_leaf_stores_seed_then_accumulates() {
        let x = tensor(&[1.0, 2.0], &[2], true);
        let seed = tensor(&[0.5, 0.5], &[2], false);
        x.backward(Some(seed.clone())).unwrap();
        let first = x.grad().unwrap();
        assert!(first.shares_buffer(&seed));

        x.backward(Some(seed)).unwrap();
        assert_eq!(x.grad().unwrap().to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_reduce_to_broadcast_operand() {
        let g = tensor(&[1.0, 2.0, 3.0, 4.0], &[2, 2], false);
        assert_eq!(reduce_to(g.clone(), &Shape::scalar()).to_vec(), vec![10.0]);
        assert_eq!(reduce_to(g.clone(), &Shape::new(&[1, 2])).to_vec(), vec![4.0, 6.0]);
        // not a broadcast of the target: passed through
        let passed = reduce_to(g.clone(), &Shape::new(&[2, 3]));
        assert!(passed.shares_buffer(&g));
        assert_eq!(passed.shape(), g.shape());
        // same element count: relabelled, not copied
        let relabelled = reduce_to(g.clone(), &Shape::new(&[4]));
        assert!(relabelled.shares_buffer(&g));
        assert_eq!(relabelled.shape(), &Shape::new(&[4]));
    }

    #[test]
    fn test_chain_elementwise() {
        let g = tensor(&[2.0, 3.0], &[2], false);
        let local = tensor(&[4.0, 5.0], &[2], false);
        assert_eq!(chain(&g, &local).unwrap().to_vec(), vec![8.0, 15.0]);

        // scalar gradients never take the jacobian path
        let g = Tensor::scalar(2.0, false);
        let local = Tensor::ones(Shape::new(&[3]), false);
        assert_eq!(chain(&g, &local).unwrap().to_vec(), vec![2.0; 3]);
    }

    #[test]
    fn test_softmax_correction_contracts_rows() {
        // g = [1, 2], J = [[1, 2], [3, 4]]: out[r] = sum_j g[j] * J[r][j]
        let g = tensor(&[1.0, 2.0], &[2], false);
        let jac = tensor(&[1.0, 2.0, 3.0, 4.0], &[2, 2], false);
        let out = chain(&g, &jac).unwrap();
        assert_eq!(out.shape(), g.shape());
        assert_eq!(out.to_vec(), vec![5.0, 11.0]);
    }

    #[test]
    fn test_softmax_correction_batched() {
        let g = tensor(&[1.0, 0.0, 0.0, 1.0], &[2, 2], false);
        let jac = tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], &[2, 2, 2], false);
        let out = chain(&g, &jac).unwrap();
        assert_eq!(out.shape(), &Shape::new(&[2, 2]));
        // batch 0 picks column 0 of [[1,2],[3,4]], batch 1 column 1 of [[5,6],[7,8]]
        assert_eq!(out.to_vec(), vec![1.0, 3.0, 6.0, 8.0]);
    }
}
