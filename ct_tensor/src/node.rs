//! Tensors and the gradient nodes that link them into a computation graph.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use rand::Rng;

use crate::buffer::Buffer;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// Maximum number of operands any operator records.
pub const MAX_INPUTS: usize = 2;

/// Local-derivative rule of the operator that produced a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GradFn {
    Add,
    Mul,
    Sum,
    Mean,
    MatMul,
    Softmax,
}

impl fmt::Display for GradFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Gradient-tracking record of a tensor.
///
/// `grad` starts unset and is written by the backward pass. `inputs` holds
/// alias copies of the operands, so a gradient stored through them lands on
/// the same node the original operand points at.
#[derive(Default)]
pub struct GradNode {
    pub(crate) grad: Option<Tensor>,
    pub(crate) inputs: [Option<Tensor>; MAX_INPUTS],
    pub(crate) n_inputs: usize,
    pub(crate) grad_fn: Option<GradFn>,
}

impl GradNode {
    /// Recorded operands, in operator order.
    pub fn inputs(&self) -> impl Iterator<Item = &Tensor> {
        self.inputs[..self.n_inputs].iter().flatten()
    }
}

impl Drop for GradNode {
    // Unlink chains iteratively; the default recursive drop would use one
    // native frame per node on a long graph.
    fn drop(&mut self) {
        let mut pending: Vec<Tensor> = self.inputs.iter_mut().filter_map(Option::take).collect();
        while let Some(mut tensor) = pending.pop() {
            let Some(node) = tensor.node.take() else {
                continue;
            };
            if let Ok(cell) = Rc::try_unwrap(node) {
                let mut inner = cell.into_inner();
                pending.extend(inner.inputs.iter_mut().filter_map(Option::take));
            }
        }
    }
}

impl fmt::Debug for GradNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradNode")
            .field("grad_fn", &self.grad_fn)
            .field("n_inputs", &self.n_inputs)
            .field("grad", &self.grad.as_ref().map(Tensor::shape))
            .finish()
    }
}

/// An N-dimensional `f32` array with optional gradient tracking.
///
/// Cloning is O(1) and produces an alias: the clone shares the buffer and,
/// if present, the gradient node. Dropping the last alias frees both.
#[derive(Clone)]
pub struct Tensor {
    shape: Shape,
    buffer: Rc<Buffer>,
    node: Option<Rc<RefCell<GradNode>>>,
}

impl Tensor {
    fn from_buffer(buffer: Buffer, shape: Shape, requires_grad: bool) -> Self {
        debug_assert_eq!(buffer.numel(), shape.numel());
        Tensor {
            shape,
            buffer: Rc::new(buffer),
            node: requires_grad.then(|| Rc::new(RefCell::new(GradNode::default()))),
        }
    }

    /// Build an operator result, recording `inputs` when any of them is
    /// tracked.
    pub(crate) fn from_op(data: Vec<f32>, shape: Shape, grad_fn: GradFn, inputs: &[&Tensor]) -> Self {
        debug_assert!(inputs.len() <= MAX_INPUTS);
        let requires_grad = inputs.iter().any(|t| t.requires_grad());
        let out = Self::from_buffer(Buffer::from_vec(data), shape, requires_grad);

        if let Some(node) = &out.node {
            let mut node = node.borrow_mut();
            node.grad_fn = Some(grad_fn);
            for (slot, input) in node.inputs.iter_mut().zip(inputs) {
                *slot = Some((*input).clone());
            }
            node.n_inputs = inputs.len();
        }
        out
    }

    /// Untracked tensor over flat data whose length is already known to fit.
    pub(crate) fn from_parts(data: Vec<f32>, shape: Shape) -> Self {
        Self::from_buffer(Buffer::from_vec(data), shape, false)
    }

    /// Untracked alias of the same buffer viewed under another shape with
    /// the same element count.
    pub(crate) fn view_as(&self, shape: Shape) -> Self {
        debug_assert_eq!(shape.numel(), self.numel());
        Tensor {
            shape,
            buffer: Rc::clone(&self.buffer),
            node: None,
        }
    }

    // === Constructors ===

    /// Allocate a zero-filled tensor.
    pub fn new(shape: Shape, requires_grad: bool) -> Self {
        Self::zeros(shape, requires_grad)
    }

    /// Create a zeros tensor.
    pub fn zeros(shape: Shape, requires_grad: bool) -> Self {
        Self::full(shape, 0.0, requires_grad)
    }

    /// Create a ones tensor.
    pub fn ones(shape: Shape, requires_grad: bool) -> Self {
        Self::full(shape, 1.0, requires_grad)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: Shape, value: f32, requires_grad: bool) -> Self {
        Self::from_buffer(Buffer::filled(shape.numel(), value), shape, requires_grad)
    }

    /// Create a scalar (0-dim) tensor.
    pub fn scalar(value: f32, requires_grad: bool) -> Self {
        Self::full(Shape::scalar(), value, requires_grad)
    }

    /// Create a tensor from a flat row-major data vector and shape.
    pub fn from_vec(data: Vec<f32>, shape: Shape, requires_grad: bool) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::DataLength {
                expected: shape.numel(),
                got: data.len(),
            });
        }
        Ok(Self::from_buffer(Buffer::from_vec(data), shape, requires_grad))
    }

    /// Create a tensor with values drawn uniformly from `[-1, 1)`.
    pub fn rand<R: Rng>(shape: Shape, requires_grad: bool, rng: &mut R) -> Self {
        let data = (0..shape.numel()).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self::from_buffer(Buffer::from_vec(data), shape, requires_grad)
    }

    /// Alias sharing this tensor's buffer but carrying no gradient node.
    pub fn detach(&self) -> Self {
        Tensor {
            shape: self.shape,
            buffer: Rc::clone(&self.buffer),
            node: None,
        }
    }

    // === Accessors ===

    /// Get the shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Get number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Get number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Whether this tensor carries a gradient node.
    pub fn requires_grad(&self) -> bool {
        self.node.is_some()
    }

    pub(crate) fn node(&self) -> Option<&Rc<RefCell<GradNode>>> {
        self.node.as_ref()
    }

    /// Accumulated gradient, once a backward pass has reached this tensor.
    pub fn grad(&self) -> Option<Tensor> {
        self.node.as_ref().and_then(|n| n.borrow().grad.clone())
    }

    /// Operator that produced this tensor; `None` for leaves and untracked
    /// tensors.
    pub fn grad_fn(&self) -> Option<GradFn> {
        self.node.as_ref().and_then(|n| n.borrow().grad_fn)
    }

    /// Number of recorded operands.
    pub fn n_inputs(&self) -> usize {
        self.node.as_ref().map_or(0, |n| n.borrow().n_inputs)
    }

    /// Recorded operand `i`.
    pub fn input(&self, i: usize) -> Option<Tensor> {
        self.node.as_ref()?.borrow().inputs().nth(i).cloned()
    }

    /// Borrow the elements.
    pub fn data(&self) -> Ref<'_, [f32]> {
        self.buffer.as_slice()
    }

    /// Mutably borrow the elements. Writes are visible through every alias
    /// of the buffer.
    pub fn data_mut(&self) -> RefMut<'_, [f32]> {
        self.buffer.as_slice_mut()
    }

    /// Copy the elements out.
    pub fn to_vec(&self) -> Vec<f32> {
        self.buffer.to_vec()
    }

    /// Get the value of a single-element tensor.
    pub fn item(&self) -> Result<f32> {
        if self.numel() != 1 {
            return Err(TensorError::NotScalar(self.shape));
        }
        Ok(self.data()[0])
    }

    /// Whether both tensors alias the same buffer.
    pub fn shares_buffer(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Number of tensor values currently holding this buffer.
    pub fn buffer_refcount(&self) -> usize {
        Rc::strong_count(&self.buffer)
    }

    // === Autodiff ===

    /// Propagate gradients from this tensor to every tracked ancestor.
    ///
    /// Without a seed the tensor must hold exactly one element and is seeded
    /// with one.
    pub fn backward(&self, seed: Option<Tensor>) -> Result<()> {
        crate::backward::backward(self, seed)
    }

    /// Visit every tracked tensor of the graph in backward order; returns
    /// the number of visits.
    pub fn backward_apply<F>(&self, visitor: F) -> usize
    where
        F: FnMut(&Tensor),
    {
        crate::backward::backward_apply(self, visitor)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad())
            .field("grad_fn", &self.grad_fn())
            .finish()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor([")?;
        for (i, v) in self.data().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", v)?;
        }
        write!(f, "], shape={}", self.shape)?;

        if let Some(node) = &self.node {
            let node = node.borrow();
            match node.grad_fn {
                Some(grad_fn) => write!(f, ", grad_fn=<{}>", grad_fn)?,
                None => write!(f, ", requires_grad=true")?,
            }
            match &node.grad {
                Some(grad) => write!(f, ", grad={}", grad)?,
                None => write!(f, ", grad=None")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::zeros(Shape::new(&[2, 3]), false);
        assert_eq!(t.shape().dims(), &[2, 3]);
        assert_eq!(t.to_vec(), vec![0.0; 6]);
        assert!(!t.requires_grad());

        let t2 = Tensor::ones(Shape::new(&[2, 3]), true);
        assert_eq!(t2.to_vec(), vec![1.0; 6]);
        assert!(t2.requires_grad());
        assert!(t2.grad().is_none());
        assert_eq!(t2.grad_fn(), None);
        assert_eq!(t2.n_inputs(), 0);

        let s = Tensor::scalar(42.0, false);
        assert!(s.shape().is_scalar());
        assert_eq!(s.item(), Ok(42.0));
    }

    #[test]
    fn test_from_vec_length_check() {
        let err = Tensor::from_vec(vec![1.0, 2.0, 3.0], Shape::new(&[2, 2]), false).unwrap_err();
        assert_eq!(err, TensorError::DataLength { expected: 4, got: 3 });
    }

    #[test]
    fn test_item_requires_single_element() {
        let t = Tensor::ones(Shape::new(&[2]), false);
        assert_eq!(t.item(), Err(TensorError::NotScalar(Shape::new(&[2]))));
        assert_eq!(Tensor::ones(Shape::new(&[1, 1]), false).item(), Ok(1.0));
    }

    #[test]
    fn test_rand_is_seeded_and_bounded() {
        let shape = Shape::new(&[4, 4]);
        let a = Tensor::rand(shape, false, &mut StdRng::seed_from_u64(7));
        let b = Tensor::rand(shape, false, &mut StdRng::seed_from_u64(7));
        assert_eq!(a.to_vec(), b.to_vec());
        assert!(a.data().iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn test_detach_shares_buffer() {
        let t = Tensor::ones(Shape::new(&[3]), true);
        assert_eq!(t.buffer_refcount(), 1);

        let d = t.detach();
        assert!(!d.requires_grad());
        assert!(d.shares_buffer(&t));
        assert_eq!(t.buffer_refcount(), 2);

        drop(d);
        assert_eq!(t.buffer_refcount(), 1);
        assert_eq!(t.to_vec(), vec![1.0; 3]);
    }

    #[test]
    fn test_writes_visible_through_aliases() {
        let t = Tensor::zeros(Shape::new(&[2]), false);
        let alias = t.clone();
        alias.data_mut()[0] = 3.0;
        assert_eq!(t.to_vec(), vec![3.0, 0.0]);
    }

    #[test]
    fn test_display() {
        let t = Tensor::from_vec(vec![1.0, 2.5], Shape::new(&[2]), false).unwrap();
        assert_eq!(t.to_string(), "Tensor([1.0000, 2.5000], shape=(2,))");

        let leaf = Tensor::scalar(1.0, true);
        assert_eq!(
            leaf.to_string(),
            "Tensor([1.0000], shape=(), requires_grad=true, grad=None)"
        );
    }

    #[test]
    fn test_deep_chain_drops() {
        let x = Tensor::ones(Shape::new(&[1]), true);
        let mut y = x.clone();
        for _ in 0..100_000 {
            y = Tensor::from_op(vec![1.0], Shape::new(&[1]), GradFn::Add, &[&y]);
        }
        drop(y);
        assert_eq!(x.buffer_refcount(), 1);
    }
}
