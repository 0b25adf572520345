//! Dense matrix views and owning storage.
//!
//! [`MatRef`] and [`MatMut`] are borrowed views over a strided matrix
//! buffer. The factorization routines operate exclusively on views, so the
//! same code paths serve owned matrices, caller-provided column-major
//! buffers with a leading dimension, and submatrices of either.

use crate::RealField;
use assert2::{assert as fancy_assert, debug_assert as fancy_debug_assert};
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};
use core::ptr::NonNull;
use reborrow::*;

struct MatSliceBase<T> {
    ptr: NonNull<T>,
    nrows: usize,
    ncols: usize,
    row_stride: isize,
    col_stride: isize,
}

impl<T> Copy for MatSliceBase<T> {}
impl<T> Clone for MatSliceBase<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

/// Immutable matrix view with general row and column strides.
pub struct MatRef<'a, T> {
    base: MatSliceBase<T>,
    _marker: PhantomData<&'a T>,
}

/// Mutable matrix view with general row and column strides.
pub struct MatMut<'a, T> {
    base: MatSliceBase<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T> Copy for MatRef<'a, T> {}
impl<'a, T> Clone for MatRef<'a, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

unsafe impl<'a, T: Sync> Sync for MatRef<'a, T> {}
unsafe impl<'a, T: Sync> Send for MatRef<'a, T> {}
unsafe impl<'a, T: Sync> Sync for MatMut<'a, T> {}
unsafe impl<'a, T: Send> Send for MatMut<'a, T> {}

impl<'b, 'a, T> Reborrow<'b> for MatRef<'a, T> {
    type Target = MatRef<'b, T>;
    #[inline]
    fn rb(&'b self) -> Self::Target {
        *self
    }
}
impl<'b, 'a, T> ReborrowMut<'b> for MatRef<'a, T> {
    type Target = MatRef<'b, T>;
    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        *self
    }
}

impl<'b, 'a, T> Reborrow<'b> for MatMut<'a, T> {
    type Target = MatRef<'b, T>;
    #[inline]
    fn rb(&'b self) -> Self::Target {
        Self::Target {
            base: self.base,
            _marker: PhantomData,
        }
    }
}
impl<'b, 'a, T> ReborrowMut<'b> for MatMut<'a, T> {
    type Target = MatMut<'b, T>;
    #[inline]
    fn rb_mut(&'b mut self) -> Self::Target {
        Self::Target {
            base: self.base,
            _marker: PhantomData,
        }
    }
}

#[inline]
fn col_major_len(nrows: usize, ncols: usize, col_stride: usize) -> usize {
    if nrows == 0 || ncols == 0 {
        0
    } else {
        col_stride * (ncols - 1) + nrows
    }
}

impl<'a, T> MatRef<'a, T> {
    /// Returns a view over a matrix starting at the given pointer, with the
    /// given dimensions and strides.
    ///
    /// # Safety
    ///
    /// The pointed-to memory must be initialized and valid for reads for the
    /// lifetime `'a`, for every element reachable through the strides, and
    /// no element may be reachable through two distinct index pairs.
    #[inline]
    pub unsafe fn from_raw_parts(
        ptr: *const T,
        nrows: usize,
        ncols: usize,
        row_stride: isize,
        col_stride: isize,
    ) -> Self {
        Self {
            base: MatSliceBase {
                ptr: NonNull::new_unchecked(ptr as *mut T),
                nrows,
                ncols,
                row_stride,
                col_stride,
            },
            _marker: PhantomData,
        }
    }

    /// Returns a view over a column-major matrix stored in `slice`, with a
    /// column stride (leading dimension) possibly exceeding the row count.
    #[inline]
    pub fn from_col_major_slice(
        slice: &'a [T],
        nrows: usize,
        ncols: usize,
        col_stride: usize,
    ) -> Self {
        fancy_assert!(ncols <= 1 || col_stride >= nrows);
        fancy_assert!(slice.len() >= col_major_len(nrows, ncols, col_stride));
        unsafe { Self::from_raw_parts(slice.as_ptr(), nrows, ncols, 1, col_stride as isize) }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.base.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.base.ncols
    }

    #[inline]
    pub fn row_stride(&self) -> isize {
        self.base.row_stride
    }

    #[inline]
    pub fn col_stride(&self) -> isize {
        self.base.col_stride
    }

    #[inline]
    unsafe fn ptr_at(self, i: usize, j: usize) -> *const T {
        self.base
            .ptr
            .as_ptr()
            .offset(i as isize * self.base.row_stride + j as isize * self.base.col_stride)
    }

    /// Reads the element at position `(i, j)`.
    #[inline]
    pub fn read(&self, i: usize, j: usize) -> T
    where
        T: Copy,
    {
        fancy_assert!(i < self.nrows());
        fancy_assert!(j < self.ncols());
        unsafe { *self.rb().ptr_at(i, j) }
    }

    /// Returns a view over the transpose.
    #[inline]
    pub fn transpose(self) -> MatRef<'a, T> {
        MatRef {
            base: MatSliceBase {
                ptr: self.base.ptr,
                nrows: self.base.ncols,
                ncols: self.base.nrows,
                row_stride: self.base.col_stride,
                col_stride: self.base.row_stride,
            },
            _marker: PhantomData,
        }
    }

    /// Returns a view over the submatrix starting at `(i, j)` with the given
    /// dimensions.
    #[inline]
    pub fn submatrix(self, i: usize, j: usize, nrows: usize, ncols: usize) -> MatRef<'a, T> {
        fancy_assert!(i <= self.nrows());
        fancy_assert!(j <= self.ncols());
        fancy_assert!(nrows <= self.nrows() - i);
        fancy_assert!(ncols <= self.ncols() - j);
        unsafe {
            MatRef::from_raw_parts(
                self.ptr_at(i, j),
                nrows,
                ncols,
                self.base.row_stride,
                self.base.col_stride,
            )
        }
    }

    /// Splits the view horizontally at the `i`-th row, returning the views
    /// over rows `0..i` and `i..nrows`.
    #[inline]
    pub fn split_at_row(self, i: usize) -> (MatRef<'a, T>, MatRef<'a, T>) {
        fancy_assert!(i <= self.nrows());
        (
            self.submatrix(0, 0, i, self.ncols()),
            self.submatrix(i, 0, self.nrows() - i, self.ncols()),
        )
    }

    /// Splits the view vertically at the `j`-th column, returning the views
    /// over columns `0..j` and `j..ncols`.
    #[inline]
    pub fn split_at_col(self, j: usize) -> (MatRef<'a, T>, MatRef<'a, T>) {
        fancy_assert!(j <= self.ncols());
        (
            self.submatrix(0, 0, self.nrows(), j),
            self.submatrix(0, j, self.nrows(), self.ncols() - j),
        )
    }
}

impl<'a, T> MatMut<'a, T> {
    /// Mutable counterpart of [`MatRef::from_raw_parts`].
    ///
    /// # Safety
    ///
    /// Same requirements as [`MatRef::from_raw_parts`], and the memory must
    /// additionally be valid for writes and not aliased by any other live
    /// reference for the lifetime `'a`.
    #[inline]
    pub unsafe fn from_raw_parts(
        ptr: *mut T,
        nrows: usize,
        ncols: usize,
        row_stride: isize,
        col_stride: isize,
    ) -> Self {
        Self {
            base: MatSliceBase {
                ptr: NonNull::new_unchecked(ptr),
                nrows,
                ncols,
                row_stride,
                col_stride,
            },
            _marker: PhantomData,
        }
    }

    /// Mutable counterpart of [`MatRef::from_col_major_slice`].
    #[inline]
    pub fn from_col_major_slice(
        slice: &'a mut [T],
        nrows: usize,
        ncols: usize,
        col_stride: usize,
    ) -> Self {
        fancy_assert!(ncols <= 1 || col_stride >= nrows);
        fancy_assert!(slice.len() >= col_major_len(nrows, ncols, col_stride));
        unsafe { Self::from_raw_parts(slice.as_mut_ptr(), nrows, ncols, 1, col_stride as isize) }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.base.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.base.ncols
    }

    #[inline]
    pub fn row_stride(&self) -> isize {
        self.base.row_stride
    }

    #[inline]
    pub fn col_stride(&self) -> isize {
        self.base.col_stride
    }

    #[inline]
    unsafe fn ptr_at(&mut self, i: usize, j: usize) -> *mut T {
        self.base
            .ptr
            .as_ptr()
            .offset(i as isize * self.base.row_stride + j as isize * self.base.col_stride)
    }

    /// Reads the element at position `(i, j)`.
    #[inline]
    pub fn read(&self, i: usize, j: usize) -> T
    where
        T: Copy,
    {
        self.rb().read(i, j)
    }

    /// Writes `value` to the element at position `(i, j)`.
    #[inline]
    pub fn write(&mut self, i: usize, j: usize, value: T) {
        fancy_assert!(i < self.nrows());
        fancy_assert!(j < self.ncols());
        unsafe { *self.ptr_at(i, j) = value };
    }

    /// Returns a mutable view over the transpose.
    #[inline]
    pub fn transpose(self) -> MatMut<'a, T> {
        MatMut {
            base: MatSliceBase {
                ptr: self.base.ptr,
                nrows: self.base.ncols,
                ncols: self.base.nrows,
                row_stride: self.base.col_stride,
                col_stride: self.base.row_stride,
            },
            _marker: PhantomData,
        }
    }

    /// Returns a mutable view over the submatrix starting at `(i, j)` with
    /// the given dimensions.
    #[inline]
    pub fn submatrix(mut self, i: usize, j: usize, nrows: usize, ncols: usize) -> MatMut<'a, T> {
        fancy_assert!(i <= self.nrows());
        fancy_assert!(j <= self.ncols());
        fancy_assert!(nrows <= self.nrows() - i);
        fancy_assert!(ncols <= self.ncols() - j);
        let row_stride = self.base.row_stride;
        let col_stride = self.base.col_stride;
        unsafe { MatMut::from_raw_parts(self.ptr_at(i, j), nrows, ncols, row_stride, col_stride) }
    }

    /// Splits the view horizontally at the `i`-th row. The two returned
    /// views are disjoint.
    #[inline]
    pub fn split_at_row(mut self, i: usize) -> (MatMut<'a, T>, MatMut<'a, T>) {
        fancy_assert!(i <= self.nrows());
        let nrows = self.nrows();
        let ncols = self.ncols();
        let row_stride = self.base.row_stride;
        let col_stride = self.base.col_stride;
        unsafe {
            (
                MatMut::from_raw_parts(self.ptr_at(0, 0), i, ncols, row_stride, col_stride),
                MatMut::from_raw_parts(self.ptr_at(i, 0), nrows - i, ncols, row_stride, col_stride),
            )
        }
    }

    /// Splits the view vertically at the `j`-th column. The two returned
    /// views are disjoint.
    #[inline]
    pub fn split_at_col(mut self, j: usize) -> (MatMut<'a, T>, MatMut<'a, T>) {
        fancy_assert!(j <= self.ncols());
        let nrows = self.nrows();
        let ncols = self.ncols();
        let row_stride = self.base.row_stride;
        let col_stride = self.base.col_stride;
        unsafe {
            (
                MatMut::from_raw_parts(self.ptr_at(0, 0), nrows, j, row_stride, col_stride),
                MatMut::from_raw_parts(self.ptr_at(0, j), nrows, ncols - j, row_stride, col_stride),
            )
        }
    }
}

/// Owning column-major matrix, with a column stride equal to its row count.
#[derive(Clone, Debug)]
pub struct Mat<T> {
    data: Vec<T>,
    nrows: usize,
    ncols: usize,
}

impl<T> Mat<T> {
    /// Returns a matrix with dimensions `(nrows, ncols)`, filled with the
    /// values produced by `f(i, j)`, in column-major order.
    pub fn with_dims(mut f: impl FnMut(usize, usize) -> T, nrows: usize, ncols: usize) -> Self {
        let mut data = Vec::with_capacity(nrows.checked_mul(ncols).unwrap());
        for j in 0..ncols {
            for i in 0..nrows {
                data.push(f(i, j));
            }
        }
        Self { data, nrows, ncols }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Returns a view over the full matrix.
    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, T> {
        MatRef::from_col_major_slice(&self.data, self.nrows, self.ncols, self.nrows)
    }

    /// Returns a mutable view over the full matrix.
    #[inline]
    pub fn as_mut(&mut self) -> MatMut<'_, T> {
        let nrows = self.nrows;
        let ncols = self.ncols;
        MatMut::from_col_major_slice(&mut self.data, nrows, ncols, nrows)
    }

    /// Returns the backing column-major slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Returns the backing column-major slice, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: RealField> Mat<T> {
    /// Returns a zero matrix with dimensions `(nrows, ncols)`.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::with_dims(|_, _| T::zero(), nrows, ncols)
    }

    /// Returns the identity matrix of the given dimension.
    pub fn identity(dim: usize) -> Self {
        Self::with_dims(|i, j| if i == j { T::one() } else { T::zero() }, dim, dim)
    }
}

impl<T> Index<(usize, usize)> for Mat<T> {
    type Output = T;

    #[inline]
    fn index(&self, (i, j): (usize, usize)) -> &T {
        fancy_debug_assert!(i < self.nrows);
        fancy_debug_assert!(j < self.ncols);
        &self.data[i + j * self.nrows]
    }
}

impl<T> IndexMut<(usize, usize)> for Mat<T> {
    #[inline]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
        fancy_debug_assert!(i < self.nrows);
        fancy_debug_assert!(j < self.ncols);
        &mut self.data[i + j * self.nrows]
    }
}
