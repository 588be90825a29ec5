//! CPU compute kernels over flat row-major slices.
//!
//! Kernels know nothing about gradient tracking; the operator layer in
//! [`crate::ops`] validates shapes, calls into here and wires up the graph.

use crate::error::{Result, TensorError};
use crate::shape::{Shape, MAX_DIMS};

/// Maps flat indices of a broadcast result back to flat indices of one
/// operand.
struct BroadcastIndex {
    out_strides: [usize; MAX_DIMS],
    src_strides: [usize; MAX_DIMS],
    ndim: usize,
}

impl BroadcastIndex {
    fn new(src: &Shape, out: &Shape) -> Self {
        let aligned = src.aligned();
        let ndim = out.ndim();

        // Stretched dims get stride 0 so every output index along them reads
        // the same source element.
        let mut src_strides = [0usize; MAX_DIMS];
        let mut step = 1;
        for d in (0..ndim).rev() {
            if aligned[d] != 1 {
                src_strides[d] = step;
                step *= aligned[d];
            }
        }

        BroadcastIndex {
            out_strides: out.contiguous_strides(),
            src_strides,
            ndim,
        }
    }

    fn source(&self, flat: usize) -> usize {
        let mut rem = flat;
        let mut offset = 0;
        for d in 0..self.ndim {
            let idx = rem / self.out_strides[d];
            rem %= self.out_strides[d];
            offset += idx * self.src_strides[d];
        }
        offset
    }
}

/// Binary operation with broadcasting into `out_shape`.
pub(crate) fn binary_op_broadcast<F>(
    a: &[f32],
    a_shape: &Shape,
    b: &[f32],
    b_shape: &Shape,
    out_shape: &Shape,
    op: F,
) -> Vec<f32>
where
    F: Fn(f32, f32) -> f32,
{
    if a_shape == out_shape && b_shape == out_shape {
        return a.iter().zip(b.iter()).map(|(&x, &y)| op(x, y)).collect();
    }

    let a_index = BroadcastIndex::new(a_shape, out_shape);
    let b_index = BroadcastIndex::new(b_shape, out_shape);

    (0..out_shape.numel())
        .map(|i| op(a[a_index.source(i)], b[b_index.source(i)]))
        .collect()
}

/// Sum a broadcast result back down to the shape of one of its operands.
pub(crate) fn sum_to(x: &[f32], x_shape: &Shape, target: &Shape) -> Vec<f32> {
    if x_shape == target {
        return x.to_vec();
    }

    let index = BroadcastIndex::new(target, x_shape);
    let mut data = vec![0.0f32; target.numel()];
    for (i, &v) in x.iter().enumerate() {
        data[index.source(i)] += v;
    }
    data
}

/// Sum of all elements.
pub(crate) fn sum_all(x: &[f32]) -> f32 {
    x.iter().sum()
}

/// Sum over the last dim of a row-major tensor whose rows have length `n`.
pub(crate) fn sum_last_dim(x: &[f32], n: usize) -> Vec<f32> {
    x.chunks(n).map(sum_all).collect()
}

/// Matrix multiplication: `(..., M, K) @ (..., K, N) -> (..., M, N)`.
///
/// Batch dims come from `a`; `b` must either carry a single matrix or the
/// same batch dims as `a`.
pub(crate) fn matmul_impl(
    a: &[f32],
    a_shape: &Shape,
    b: &[f32],
    b_shape: &Shape,
) -> Result<(Vec<f32>, Shape)> {
    let a_ndim = a_shape.ndim();
    let b_ndim = b_shape.ndim();

    if a_ndim < 2 || b_ndim < 2 {
        return Err(TensorError::RankPrecondition(format!(
            "matmul requires rank >= 2 operands, got {} @ {}",
            a_shape, b_shape
        )));
    }

    let m = a_shape.dim(a_ndim - 2);
    let k = a_shape.dim(a_ndim - 1);
    let k2 = b_shape.dim(b_ndim - 2);
    let n = b_shape.dim(b_ndim - 1);

    if k != k2 {
        return Err(TensorError::RankPrecondition(format!(
            "matmul inner dimensions disagree: {} @ {}",
            a_shape, b_shape
        )));
    }

    let batches = a_shape.numel() / (m * k);
    let b_batches = b_shape.numel() / (k * n);
    let b_shared = b_batches == 1;
    if !b_shared && a_shape.dims()[..a_ndim - 2] != b_shape.dims()[..b_ndim - 2] {
        return Err(TensorError::RankPrecondition(format!(
            "matmul batch dimensions disagree: {} @ {}",
            a_shape, b_shape
        )));
    }

    let out_shape = a_shape.with_dim(a_ndim - 1, n);
    let mut data = vec![0.0f32; out_shape.numel()];

    for batch in 0..batches {
        let a_offset = batch * m * k;
        let b_offset = if b_shared { 0 } else { batch * k * n };
        let out_offset = batch * m * n;

        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for l in 0..k {
                    sum += a[a_offset + i * k + l] * b[b_offset + l * n + j];
                }
                data[out_offset + i * n + j] = sum;
            }
        }
    }

    Ok((data, out_shape))
}

/// Index of the maximum along `dim` for every slice, in row-major order of
/// the remaining dims. The earliest index wins a tie.
pub(crate) fn argmax(x: &[f32], shape: &Shape, dim: usize) -> Vec<usize> {
    let len = shape.dim(dim);
    let inner: usize = shape.dims()[dim + 1..].iter().product();
    let outer: usize = shape.dims()[..dim].iter().product();

    let mut result = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        let base = o * len * inner;
        for i in 0..inner {
            let mut best = 0;
            for j in 1..len {
                if x[base + best * inner + i] < x[base + j * inner + i] {
                    best = j;
                }
            }
            result.push(best);
        }
    }
    result
}

/// Softmax over rows of length `n`.
pub(crate) fn softmax_rows(x: &[f32], n: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(x.len());
    for row in x.chunks(n) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
        let total = sum_all(&exps);
        out.extend(exps.iter().map(|&e| e / total));
    }
    out
}

/// Per-row softmax Jacobian `J[r][j] = s_r * (delta_rj - s_j)`, laid out as
/// one `n x n` block per row of `s`.
pub(crate) fn softmax_jacobian(s: &[f32], n: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(s.len() * n);
    for row in s.chunks(n) {
        for r in 0..n {
            for j in 0..n {
                let delta = if r == j { 1.0 } else { 0.0 };
                out.push(row[r] * (delta - row[j]));
            }
        }
    }
    out
}
