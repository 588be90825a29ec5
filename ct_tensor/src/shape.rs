//! Fixed-capacity tensor shapes.

use std::fmt;

use crate::error::{Result, TensorError};

/// Maximum rank a tensor can have.
pub const MAX_DIMS: usize = 4;

/// A tensor shape: up to [`MAX_DIMS`] positive sizes.
///
/// Entries past `ndim()` are always zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: [usize; MAX_DIMS],
    len: usize,
}

impl Shape {
    /// Create a shape from dimensions.
    ///
    /// Panics on more than [`MAX_DIMS`] dims or a zero-sized dim; use
    /// [`Shape::try_new`] for untrusted input.
    pub fn new(dims: &[usize]) -> Self {
        match Self::try_new(dims) {
            Ok(shape) => shape,
            Err(e) => panic!("{e}"),
        }
    }

    /// Create a shape from dimensions, validating rank and sizes.
    pub fn try_new(dims: &[usize]) -> Result<Self> {
        if dims.len() > MAX_DIMS {
            return Err(TensorError::InvalidShape(format!(
                "{} dims exceed the maximum of {}",
                dims.len(),
                MAX_DIMS
            )));
        }
        if let Some(pos) = dims.iter().position(|&d| d == 0) {
            return Err(TensorError::InvalidShape(format!("dim {pos} has size 0")));
        }
        let mut shape = Shape::scalar();
        shape.dims[..dims.len()].copy_from_slice(dims);
        shape.len = dims.len();
        Ok(shape)
    }

    /// Create a scalar shape (0-dimensional).
    pub const fn scalar() -> Self {
        Shape {
            dims: [0; MAX_DIMS],
            len: 0,
        }
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.len
    }

    /// Get dimension at index.
    pub fn dim(&self, idx: usize) -> usize {
        self.dims()[idx]
    }

    /// Get dimensions as slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.len]
    }

    /// Total number of elements. A scalar has one.
    pub fn numel(&self) -> usize {
        self.dims().iter().product()
    }

    /// Check if this is a scalar (0-dim tensor).
    pub fn is_scalar(&self) -> bool {
        self.len == 0
    }

    /// Resolve a possibly negative dimension index against this shape.
    pub fn normalize_dim(&self, dim: isize) -> Result<usize> {
        let ndim = self.len as isize;
        let resolved = if dim < 0 { dim + ndim } else { dim };
        if (0..ndim).contains(&resolved) {
            Ok(resolved as usize)
        } else {
            Err(TensorError::DimOutOfRange {
                dim,
                ndim: self.len,
            })
        }
    }

    /// Row-major strides. Entries past `ndim()` are zero.
    pub fn contiguous_strides(&self) -> [usize; MAX_DIMS] {
        let mut strides = [0usize; MAX_DIMS];
        let mut step = 1;
        for i in (0..self.len).rev() {
            strides[i] = step;
            step *= self.dims[i];
        }
        strides
    }

    /// Reconcile two operand shapes for an elementwise operation.
    ///
    /// Supported cases, in order: identical shapes; a single-element operand
    /// stretched over the other; equal rank where every mismatched pair has a
    /// 1 on one side; ranks differing by one, where the shorter shape gets a
    /// trailing singleton and the previous rule applies.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        if self == other || other.numel() == 1 {
            return Some(*self);
        }
        if self.numel() == 1 {
            return Some(*other);
        }

        let (a, b) = match self.len as isize - other.len as isize {
            0 => (*self, *other),
            1 => (*self, other.push(1)?),
            -1 => (self.push(1)?, *other),
            _ => return None,
        };

        let mut result = a;
        for i in 0..a.len {
            let (d1, d2) = (a.dims[i], b.dims[i]);
            result.dims[i] = if d1 == d2 || d2 == 1 {
                d1
            } else if d1 == 1 {
                d2
            } else {
                return None;
            };
        }
        Some(result)
    }

    /// Per-dim sizes this operand contributes to a broadcast result, padded
    /// with trailing ones. A single-element operand aligns as all ones.
    pub(crate) fn aligned(&self) -> [usize; MAX_DIMS] {
        let mut aligned = [1usize; MAX_DIMS];
        if self.numel() == 1 {
            return aligned;
        }
        aligned[..self.len].copy_from_slice(self.dims());
        aligned
    }

    /// Append a trailing dim. `None` when already at [`MAX_DIMS`].
    pub(crate) fn push(&self, size: usize) -> Option<Shape> {
        if self.len == MAX_DIMS {
            return None;
        }
        let mut shape = *self;
        shape.dims[self.len] = size;
        shape.len += 1;
        Some(shape)
    }

    /// Replace the size of one dim.
    pub(crate) fn with_dim(&self, idx: usize, size: usize) -> Shape {
        let mut shape = *self;
        shape.dims[idx] = size;
        shape
    }
}

impl Default for Shape {
    fn default() -> Self {
        Shape::scalar()
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.len == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = TensorError;

    fn try_from(dims: &[usize]) -> Result<Self> {
        Shape::try_new(dims)
    }
}

impl<const N: usize> TryFrom<[usize; N]> for Shape {
    type Error = TensorError;

    fn try_from(dims: [usize; N]) -> Result<Self> {
        Shape::try_new(&dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_basics() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.ndim(), 3);
        assert_eq!(s.dim(0), 2);
        assert_eq!(s.dim(1), 3);
        assert_eq!(s.dim(2), 4);
        assert_eq!(s.numel(), 24);
        assert!(!s.is_scalar());
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert!(s.is_scalar());
        assert_eq!(s, Shape::new(&[]));
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(
            Shape::try_new(&[2, 0, 3]),
            Err(TensorError::InvalidShape(_))
        ));
        assert!(matches!(
            Shape::try_new(&[1, 2, 3, 4, 5]),
            Err(TensorError::InvalidShape(_))
        ));
        assert!(Shape::try_from([1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn test_normalize_dim() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.normalize_dim(0), Ok(0));
        assert_eq!(s.normalize_dim(2), Ok(2));
        assert_eq!(s.normalize_dim(-1), Ok(2));
        assert_eq!(s.normalize_dim(-3), Ok(0));
        assert_eq!(
            s.normalize_dim(3),
            Err(TensorError::DimOutOfRange { dim: 3, ndim: 3 })
        );
        assert_eq!(
            s.normalize_dim(-4),
            Err(TensorError::DimOutOfRange { dim: -4, ndim: 3 })
        );
        assert!(Shape::scalar().normalize_dim(0).is_err());
    }

    #[test]
    fn test_contiguous_strides() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.contiguous_strides(), [12, 4, 1, 0]);
        assert_eq!(Shape::new(&[3, 4]).contiguous_strides(), [4, 1, 0, 0]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(&[2, 3]).to_string(), "(2, 3)");
        assert_eq!(Shape::new(&[5]).to_string(), "(5,)");
        assert_eq!(Shape::scalar().to_string(), "()");
        assert_eq!(format!("{:?}", Shape::new(&[2, 3])), "Shape([2, 3])");
    }

    #[test]
    fn test_broadcast_same_shape() {
        let a = Shape::new(&[2, 3]);
        let b = Shape::new(&[2, 3]);
        assert_eq!(a.broadcast_with(&b), Some(Shape::new(&[2, 3])));
    }

    #[test]
    fn test_broadcast_scalar() {
        let a = Shape::new(&[2, 3]);
        let b = Shape::scalar();
        assert_eq!(a.broadcast_with(&b), Some(Shape::new(&[2, 3])));
        assert_eq!(b.broadcast_with(&a), Some(Shape::new(&[2, 3])));
        // the (1,) stand-in used by mul stretches the same way
        assert_eq!(Shape::new(&[1]).broadcast_with(&a), Some(a));
    }

    #[test]
    fn test_broadcast_singleton_dims() {
        let a = Shape::new(&[2, 1, 3]);
        let b = Shape::new(&[2, 3, 3]);
        assert_eq!(a.broadcast_with(&b), Some(Shape::new(&[2, 3, 3])));
        assert_eq!(b.broadcast_with(&a), Some(Shape::new(&[2, 3, 3])));
    }

    #[test]
    fn test_broadcast_one_dim_shorter() {
        let a = Shape::new(&[2, 3]);
        let b = Shape::new(&[2, 3, 4]);
        assert_eq!(a.broadcast_with(&b), Some(Shape::new(&[2, 3, 4])));
        assert_eq!(b.broadcast_with(&a), Some(Shape::new(&[2, 3, 4])));
    }

    #[test]
    fn test_broadcast_incompatible() {
        let a = Shape::new(&[2, 3]);
        assert_eq!(a.broadcast_with(&Shape::new(&[2, 4])), None);
        assert_eq!(a.broadcast_with(&Shape::new(&[3])), None);
        assert_eq!(a.broadcast_with(&Shape::new(&[2, 3, 4, 5])), None);
    }
}
