//! QR factorization without pivoting.
//!
//! The factorization overwrites the input matrix: `R` occupies the upper
//! triangle (diagonal included) and the Householder reflector tails occupy
//! the sub-diagonal columns, with one coefficient per reflector emitted to
//! `tau`. The unblocked routine processes one column at a time; the blocked
//! routine factors panels with the unblocked routine, assembles each panel's
//! block reflector factor, and applies it to the trailing columns as two
//! matrix products.

use crate::householder::{
    apply_block_reflector_on_the_left, apply_householder_on_the_left,
    build_block_reflector_req, make_block_reflector_in_place, make_householder_in_place,
};
use crate::{MatMut, Parallelism, QrError, RealField};
use assert2::assert as fancy_assert;
use dyn_stack::{DynStack, GlobalMemBuffer, SizeOverflow, StackReq};
use reborrow::*;

/// Panel width used by the blocked factorization.
pub(crate) const BLOCKSIZE: usize = 32;

pub(crate) fn qr_in_place_unblocked<T: RealField>(
    mut matrix: MatMut<'_, T>,
    tau: &mut [T],
    mut stack: DynStack<'_>,
) {
    let m = matrix.nrows();
    let n = matrix.ncols();
    let size = m.min(n);
    fancy_assert!(tau.len() >= size);

    for k in 0..size {
        let mat_rem = matrix.rb_mut().submatrix(k, k, m - k, n - k);
        let (col0, trailing) = mat_rem.split_at_col(1);
        let (mut head, mut tail) = col0.split_at_row(1);

        let mut tail_squared_norm = T::zero();
        for i in 0..tail.nrows() {
            let e = tail.read(i, 0);
            tail_squared_norm += e * e;
        }

        let (tau_k, beta) =
            make_householder_in_place(Some(tail.rb_mut()), head.read(0, 0), tail_squared_norm);
        tau[k] = tau_k;
        head.write(0, 0, beta);

        if trailing.ncols() > 0 {
            apply_householder_on_the_left(trailing, tail.rb(), tau_k, stack.rb_mut());
        }
    }
}

pub(crate) fn qr_in_place_blocked<T: RealField>(
    mut matrix: MatMut<'_, T>,
    tau: &mut [T],
    blocksize: usize,
    parallelism: Parallelism,
    mut stack: DynStack<'_>,
) {
    let m = matrix.nrows();
    let n = matrix.ncols();
    let size = m.min(n);
    fancy_assert!(blocksize > 0);
    fancy_assert!(tau.len() >= size);

    let mut k = 0;
    while k < size {
        let kb = blocksize.min(size - k);

        let (left, right) = matrix.rb_mut().split_at_col(k + kb);
        let mut panel = left.submatrix(k, k, m - k, kb);
        qr_in_place_unblocked(panel.rb_mut(), &mut tau[k..k + kb], stack.rb_mut());

        if right.ncols() > 0 {
            let trailing = right.submatrix(k, 0, m - k, n - k - kb);

            let (mut t_buf, mut stack_rem) =
                stack.rb_mut().make_with::<T, _>(kb * kb, |_| T::zero());
            let mut t = MatMut::from_col_major_slice(&mut t_buf, kb, kb, kb);
            make_block_reflector_in_place(t.rb_mut(), panel.rb(), &tau[k..k + kb], stack_rem.rb_mut());

            apply_block_reflector_on_the_left(
                trailing,
                panel.rb(),
                t.rb(),
                true,
                parallelism,
                stack_rem,
            );
        }

        k += kb;
    }
}

/// Workspace requirements of [`factorize_panel`].
pub fn factor_unblocked_req<T: RealField>(m: usize, n: usize) -> Result<StackReq, SizeOverflow> {
    let _ = m;
    StackReq::try_new::<T>(n)
}

/// Workspace requirements of [`factorize_blocked`].
pub fn factor_blocked_req<T: RealField>(m: usize, n: usize) -> Result<StackReq, SizeOverflow> {
    let bs = BLOCKSIZE;
    let t_mat = StackReq::try_new::<T>(bs * bs)?;
    let panel = factor_unblocked_req::<T>(m, bs)?;
    let reflector = build_block_reflector_req::<T>(m, bs)?;
    let apply = StackReq::try_new::<T>(bs.checked_mul(n).ok_or(SizeOverflow)?)?
        .try_and(StackReq::try_new::<T>(bs.checked_mul(n).ok_or(SizeOverflow)?)?)?;
    t_mat
        .try_and(panel)?
        .try_and(reflector)?
        .try_and(apply)
}

fn validate_factor_args<T>(
    m: usize,
    n: usize,
    a: &[T],
    lda: usize,
    tau: &[T],
) -> Result<(), QrError> {
    if m < 1 || n < 1 || lda < m {
        return Err(QrError::InvalidSize);
    }
    let a_len = lda
        .checked_mul(n - 1)
        .and_then(|len| len.checked_add(m))
        .ok_or(QrError::InvalidSize)?;
    if a.len() < a_len || tau.len() < m.min(n) {
        return Err(QrError::InvalidSize);
    }
    Ok(())
}

/// Unblocked QR factorization of the `m × n` column-major matrix stored in
/// `a` with leading dimension `lda`, in place. On return the upper triangle
/// of `a` holds `R`, the sub-diagonal part of column `j` holds the tail of
/// reflector `j`, and `tau[..min(m, n)]` holds the reflector coefficients.
///
/// Size preconditions (`m >= 1`, `n >= 1`, `lda >= m`, buffers covering
/// their logical extents) are validated before any buffer access;
/// violations report [`QrError::InvalidSize`].
pub fn factorize_panel<T: RealField>(
    m: usize,
    n: usize,
    a: &mut [T],
    lda: usize,
    tau: &mut [T],
) -> Result<(), QrError> {
    validate_factor_args(m, n, a, lda, tau)?;

    let req = factor_unblocked_req::<T>(m, n).map_err(|_| QrError::OutOfMemory)?;
    let mut mem = GlobalMemBuffer::new(req);
    let stack = DynStack::new(&mut mem);

    let matrix = MatMut::from_col_major_slice(a, m, n, lda);
    qr_in_place_unblocked(matrix, tau, stack);
    Ok(())
}

/// Blocked QR factorization, with the same contract and packed output
/// format as [`factorize_panel`]. Panels of width at most
/// [`BLOCKSIZE`](crate::qr) are factored with the unblocked routine and the
/// trailing columns are updated once per panel through the panel's block
/// reflector.
pub fn factorize_blocked<T: RealField>(
    m: usize,
    n: usize,
    a: &mut [T],
    lda: usize,
    tau: &mut [T],
    parallelism: Parallelism,
) -> Result<(), QrError> {
    validate_factor_args(m, n, a, lda, tau)?;

    let req = factor_blocked_req::<T>(m, n).map_err(|_| QrError::OutOfMemory)?;
    let mut mem = GlobalMemBuffer::new(req);
    let stack = DynStack::new(&mut mem);

    let matrix = MatMut::from_col_major_slice(a, m, n, lda);
    qr_in_place_blocked(matrix, tau, BLOCKSIZE, parallelism, stack);
    Ok(())
}
