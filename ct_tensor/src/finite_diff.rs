//! Finite difference utilities for gradient verification.
//!
//! Provides numerical gradients for checking the backward pass.

use crate::error::Result;
use crate::node::Tensor;

/// Compute gradients of `sum(f(inputs))` using central finite differences.
///
/// # Arguments
/// * `f` - Function building the output from untracked copies of `inputs`
/// * `inputs` - The point at which to compute gradients
/// * `eps` - Step size (around `1e-3` suits `f32`)
///
/// # Returns
/// One vector per input, holding `d sum(f) / d input[j]` for each element `j`.
///
/// # Example
/// ```
/// use ct_tensor::prelude::*;
///
/// // f(x) = x * x, so d sum(f) / dx = 2x
/// let x = Tensor::from_vec(vec![1.0, -2.0], Shape::new(&[2]), false)?;
/// let grads = finite_diff_grad(|v| v[0].mul(&v[0]), &[x], 1e-3)?;
///
/// assert!((grads[0][0] - 2.0).abs() < 1e-2);
/// assert!((grads[0][1] + 4.0).abs() < 1e-2);
/// # Ok::<(), TensorError>(())
/// ```
pub fn finite_diff_grad<F>(f: F, inputs: &[Tensor], eps: f32) -> Result<Vec<Vec<f32>>>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    let point: Vec<Vec<f32>> = inputs.iter().map(Tensor::to_vec).collect();
    let mut grads = Vec::with_capacity(inputs.len());

    for (input_idx, input) in inputs.iter().enumerate() {
        let mut input_grads = Vec::with_capacity(input.numel());

        for elem_idx in 0..input.numel() {
            // Central difference: (f(x + eps) - f(x - eps)) / (2 * eps)
            let plus = perturbed(inputs, &point, input_idx, elem_idx, eps)?;
            let minus = perturbed(inputs, &point, input_idx, elem_idx, -eps)?;

            let f_plus = f(&plus)?.sum()?.item()?;
            let f_minus = f(&minus)?.sum()?.item()?;

            input_grads.push((f_plus - f_minus) / (2.0 * eps));
        }

        grads.push(input_grads);
    }

    Ok(grads)
}

/// Untracked copies of `inputs` with one element shifted by `delta`.
fn perturbed(
    inputs: &[Tensor],
    point: &[Vec<f32>],
    input_idx: usize,
    elem_idx: usize,
    delta: f32,
) -> Result<Vec<Tensor>> {
    inputs
        .iter()
        .zip(point)
        .enumerate()
        .map(|(i, (input, values))| {
            let mut data = values.clone();
            if i == input_idx {
                data[elem_idx] += delta;
            }
            Tensor::from_vec(data, *input.shape(), false)
        })
        .collect()
}

/// Compute the maximum absolute difference between two gradient vectors.
///
/// Useful for comparing autodiff gradients against finite difference gradients.
pub fn max_grad_error(grad1: &[f32], grad2: &[f32]) -> f32 {
    assert_eq!(grad1.len(), grad2.len());
    grad1
        .iter()
        .zip(grad2.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f32::max)
}
