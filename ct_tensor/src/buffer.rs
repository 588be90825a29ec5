//! Flat element storage shared between tensor aliases.

use std::cell::{Ref, RefCell, RefMut};

/// Contiguous `f32` storage.
///
/// Tensors hold a `Buffer` behind an `Rc`; the strong count is the number of
/// tensor values aliasing the storage, and the storage is freed when the last
/// of them is dropped. Writes through one alias are visible through all of
/// them.
#[derive(Debug, Default)]
pub struct Buffer {
    data: RefCell<Vec<f32>>,
}

impl Buffer {
    /// Wrap an owned vector.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Buffer {
            data: RefCell::new(data),
        }
    }

    /// A buffer of `numel` copies of `value`.
    pub fn filled(numel: usize, value: f32) -> Self {
        Self::from_vec(vec![value; numel])
    }

    /// Number of stored elements.
    pub fn numel(&self) -> usize {
        self.data.borrow().len()
    }

    /// Borrow the elements.
    pub fn as_slice(&self) -> Ref<'_, [f32]> {
        Ref::map(self.data.borrow(), Vec::as_slice)
    }

    /// Mutably borrow the elements.
    pub fn as_slice_mut(&self) -> RefMut<'_, [f32]> {
        RefMut::map(self.data.borrow_mut(), Vec::as_mut_slice)
    }

    /// Copy the elements out.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.borrow().clone()
    }
}
