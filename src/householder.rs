//! Householder reflectors and block reflectors.
//!
//! A Householder transformation has the form `H = I - tau * v * vᵗ`, where
//! the reflector vector `v` has an implicit leading one. A sequence of `K`
//! such transformations, with reflector `j` supported on rows `j..`, admits
//! a compact representation `H(1) * H(2) * ... * H(K) = I - V * T * Vᵗ`
//! where `V` packs the reflector vectors as columns and `T` is upper
//! triangular with the Householder coefficients on its diagonal. The compact
//! form lets the whole sequence be applied with two matrix products instead
//! of `K` rank-1 updates.

use crate::mul::{
    matmul,
    triangular::{self, BlockStructure},
};
use crate::{Direction, MatMut, MatRef, Parallelism, QrError, RealField};
use assert2::assert as fancy_assert;
use dyn_stack::{DynStack, GlobalMemBuffer, SizeOverflow, StackReq};
use reborrow::*;

/// Computes a Householder reflector `H = I - tau * v * vᵗ` such that `H`
/// applied to the vector `[head, tail]` zeroes the tail. `tail_squared_norm`
/// is the squared norm of the tail, whose storage is passed in `essential`
/// and overwritten with the reflector vector tail (the implicit leading one
/// is not stored). Returns `(tau, beta)`, where `beta` is the remaining
/// leading coefficient.
pub fn make_householder_in_place<T: RealField>(
    essential: Option<MatMut<'_, T>>,
    head: T,
    tail_squared_norm: T,
) -> (T, T) {
    if tail_squared_norm == T::zero() {
        // the column is already reduced
        return (T::zero(), head);
    }

    let norm = (head * head + tail_squared_norm).sqrt();
    let sign = if head >= T::zero() { T::one() } else { -T::one() };
    let signed_norm = sign * norm;
    let head_with_beta = head + signed_norm;
    let inv = head_with_beta.recip();

    if let Some(mut essential) = essential {
        fancy_assert!(essential.ncols() == 1);
        for i in 0..essential.nrows() {
            let e = essential.read(i, 0);
            essential.write(i, 0, e * inv);
        }
    }

    let two = T::one() + T::one();
    let tau = two / (T::one() + tail_squared_norm * inv * inv);
    (tau, -signed_norm)
}

/// Applies `H = I - tau * v * vᵗ` to `matrix` from the left. `essential`
/// holds the reflector tail as a `(nrows - 1) × 1` view; the leading one is
/// implicit.
pub fn apply_householder_on_the_left<T: RealField>(
    matrix: MatMut<'_, T>,
    essential: MatRef<'_, T>,
    householder_coeff: T,
    stack: DynStack<'_>,
) {
    fancy_assert!(essential.ncols() == 1);
    fancy_assert!(matrix.nrows() == essential.nrows() + 1);
    let m = matrix.nrows();
    let n = matrix.ncols();

    if m == 1 {
        let mut matrix = matrix;
        let factor = T::one() - householder_coeff;
        for j in 0..n {
            let x = matrix.read(0, j);
            matrix.write(0, j, factor * x);
        }
    } else {
        let (mut first_row, mut last_rows) = matrix.split_at_row(1);

        // tmp = vᵗ A
        let (mut tmp_buf, _) = stack.make_with::<T, _>(n, |j| first_row.read(0, j));
        let mut tmp = MatMut::from_col_major_slice(&mut tmp_buf, 1, n, 1);
        matmul(
            tmp.rb_mut(),
            essential.transpose(),
            last_rows.rb(),
            Some(T::one()),
            T::one(),
            Parallelism::None,
        );

        // A -= tau * v * tmp
        for j in 0..n {
            let w = tmp.read(0, j);
            let x = first_row.read(0, j);
            first_row.write(0, j, x - householder_coeff * w);
        }
        matmul(
            last_rows,
            essential,
            tmp.rb(),
            Some(T::one()),
            -householder_coeff,
            Parallelism::None,
        );
    }
}

/// Builds the upper triangular factor `T` of the forward block reflector
/// formed by the columns of `basis` and the coefficients `tau`, such that
/// `H(1) * ... * H(K) = I - V * T * Vᵗ`. `basis` packs the reflector tails
/// below its diagonal; its unit diagonal and zero upper triangle are
/// implicit and never read.
///
/// `T` is filled one column at a time, each column depending only on the
/// previous ones, so every leading `K' × K'` block of the output is itself
/// the factor of the first `K'` reflectors.
pub fn make_block_reflector_in_place<T: RealField>(
    mut t: MatMut<'_, T>,
    basis: MatRef<'_, T>,
    tau: &[T],
    mut stack: DynStack<'_>,
) {
    let n = basis.nrows();
    let k = basis.ncols();
    fancy_assert!(t.nrows() == k);
    fancy_assert!(t.ncols() == k);
    fancy_assert!(tau.len() >= k);
    fancy_assert!(k <= n);

    for j in 0..k {
        let tau_j = tau[j];

        // w = -tau_j * V[j.., 0..j]ᵗ * V[j.., j], the implicit unit entry of
        // column j contributing the stored row j of the earlier columns
        let (mut w_buf, stack_rem) = stack
            .rb_mut()
            .make_with::<T, _>(j, |i| -tau_j * basis.read(j, i));
        let mut w = MatMut::from_col_major_slice(&mut w_buf, j, 1, j.max(1));
        if j > 0 && j + 1 < n {
            matmul(
                w.rb_mut(),
                basis.submatrix(j + 1, 0, n - j - 1, j).transpose(),
                basis.submatrix(j + 1, j, n - j - 1, 1),
                Some(T::one()),
                -tau_j,
                Parallelism::None,
            );
        }

        // T[0..j, j] = T[0..j, 0..j] * w
        let (mut col_buf, _) = stack_rem.make_with::<T, _>(j, |_| T::zero());
        let mut t_col = MatMut::from_col_major_slice(&mut col_buf, j, 1, j.max(1));
        triangular::matmul(
            t_col.rb_mut(),
            BlockStructure::Rectangular,
            t.rb().submatrix(0, 0, j, j),
            BlockStructure::TriangularUpper,
            w.rb(),
            BlockStructure::Rectangular,
            None,
            T::one(),
            Parallelism::None,
        );
        for i in 0..j {
            t.write(i, j, t_col.read(i, 0));
        }
        t.write(j, j, tau_j);
    }
}

/// Applies the block reflector `I - V * T * Vᵗ` (or `I - V * Tᵗ * Vᵗ` when
/// `transpose` is set, which is the transform used by trailing updates) to
/// `matrix` from the left, as two matrix products.
pub fn apply_block_reflector_on_the_left<T: RealField>(
    matrix: MatMut<'_, T>,
    basis: MatRef<'_, T>,
    t: MatRef<'_, T>,
    transpose: bool,
    parallelism: Parallelism,
    stack: DynStack<'_>,
) {
    fancy_assert!(matrix.nrows() == basis.nrows());
    let bs = basis.ncols();
    fancy_assert!(t.nrows() == bs);
    fancy_assert!(t.ncols() == bs);
    let n = matrix.ncols();

    let (basis_tri, basis_bot) = basis.split_at_row(bs);
    let (mut matrix_top, mut matrix_bot) = matrix.split_at_row(bs);

    // tmp0 = Vᵗ A
    let (mut tmp0_buf, stack_rem) = stack.make_with::<T, _>(bs * n, |_| T::zero());
    let mut tmp0 = MatMut::from_col_major_slice(&mut tmp0_buf, bs, n, bs.max(1));
    triangular::matmul(
        tmp0.rb_mut(),
        BlockStructure::Rectangular,
        basis_tri.transpose(),
        BlockStructure::UnitTriangularUpper,
        matrix_top.rb(),
        BlockStructure::Rectangular,
        None,
        T::one(),
        parallelism,
    );
    matmul(
        tmp0.rb_mut(),
        basis_bot.transpose(),
        matrix_bot.rb(),
        Some(T::one()),
        T::one(),
        parallelism,
    );

    // tmp1 = op(T) tmp0
    let (mut tmp1_buf, _) = stack_rem.make_with::<T, _>(bs * n, |_| T::zero());
    let mut tmp1 = MatMut::from_col_major_slice(&mut tmp1_buf, bs, n, bs.max(1));
    triangular::matmul(
        tmp1.rb_mut(),
        BlockStructure::Rectangular,
        if transpose { t.transpose() } else { t },
        if transpose {
            BlockStructure::TriangularLower
        } else {
            BlockStructure::TriangularUpper
        },
        tmp0.rb(),
        BlockStructure::Rectangular,
        None,
        T::one(),
        parallelism,
    );

    // A -= V tmp1
    triangular::matmul(
        matrix_top.rb_mut(),
        BlockStructure::Rectangular,
        basis_tri,
        BlockStructure::UnitTriangularLower,
        tmp1.rb(),
        BlockStructure::Rectangular,
        Some(T::one()),
        -T::one(),
        parallelism,
    );
    matmul(
        matrix_bot.rb_mut(),
        basis_bot,
        tmp1.rb(),
        Some(T::one()),
        -T::one(),
        parallelism,
    );
}

/// Workspace requirements of [`build_block_reflector`].
pub fn build_block_reflector_req<T: RealField>(
    n: usize,
    k: usize,
) -> Result<StackReq, SizeOverflow> {
    let _ = n;
    StackReq::try_new::<T>(k)?.try_and(StackReq::try_new::<T>(k)?)
}

/// Builds the `k × k` triangular factor of a block reflector from `k`
/// reflector vectors of length `n`, stored in the column-major buffer `v`
/// with leading dimension `ldv`, and their coefficients `tau`. The factor is
/// written to the column-major buffer `t` with leading dimension `ldt`; only
/// its diagonal and strict upper triangle are meaningful on return.
///
/// Size preconditions are validated before any buffer is read or written:
/// `n >= 1`, `k >= 1`, `k <= n`, `ldv >= n`, `ldt >= k`, and the buffers
/// must cover their logical extents. Violations report
/// [`QrError::InvalidSize`]. Only [`Direction::Forward`] is implemented;
/// [`Direction::Backward`] reports [`QrError::Unsupported`].
pub fn build_block_reflector<T: RealField>(
    direction: Direction,
    n: usize,
    k: usize,
    v: &[T],
    ldv: usize,
    tau: &[T],
    t: &mut [T],
    ldt: usize,
) -> Result<(), QrError> {
    if n < 1 || k < 1 || k > n || ldv < n || ldt < k {
        return Err(QrError::InvalidSize);
    }
    let v_len = ldv
        .checked_mul(k - 1)
        .and_then(|len| len.checked_add(n))
        .ok_or(QrError::InvalidSize)?;
    let t_len = ldt
        .checked_mul(k - 1)
        .and_then(|len| len.checked_add(k))
        .ok_or(QrError::InvalidSize)?;
    if v.len() < v_len || tau.len() < k || t.len() < t_len {
        return Err(QrError::InvalidSize);
    }
    if direction == Direction::Backward {
        return Err(QrError::Unsupported);
    }

    let req = build_block_reflector_req::<T>(n, k).map_err(|_| QrError::OutOfMemory)?;
    let mut mem = GlobalMemBuffer::new(req);
    let stack = DynStack::new(&mut mem);

    let v = MatRef::from_col_major_slice(v, n, k, ldv);
    let t = MatMut::from_col_major_slice(t, k, k, ldt);
    make_block_reflector_in_place(t, v, tau, stack);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{qr, Mat};
    use assert_approx_eq::assert_approx_eq;
    use rand::prelude::*;
    use std::cell::RefCell;

    macro_rules! placeholder_stack {
        () => {
            DynStack::new(&mut GlobalMemBuffer::new(StackReq::new::<f64>(1024 * 1024)))
        };
    }

    thread_local! {
        static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
    }

    fn random_value() -> f64 {
        RNG.with(|rng| rng.borrow_mut().gen::<f64>() * 2.0 - 1.0)
    }

    // H(0) * H(1) * ... * H(k-1), applied reflector by reflector
    fn reflector_product(v_packed: MatRef<'_, f64>, tau: &[f64]) -> Mat<f64> {
        let n = v_packed.nrows();
        let k = v_packed.ncols();
        let mut q = Mat::<f64>::identity(n);
        for j in (0..k).rev() {
            let essential = v_packed.submatrix(j + 1, j, n - j - 1, 1);
            apply_householder_on_the_left(
                q.as_mut().submatrix(j, 0, n - j, n),
                essential,
                tau[j],
                placeholder_stack!(),
            );
        }
        q
    }

    fn reflector_basis(n: usize, k: usize) -> (Vec<f64>, Vec<f64>) {
        // reflector sequence from the QR factorization of a random matrix
        let mut v = (0..n * k).map(|_| random_value()).collect::<Vec<f64>>();
        let mut tau = vec![0.0; k];
        qr::factorize_panel(n, k, &mut v, n, &mut tau).unwrap();
        (v, tau)
    }

    #[test]
    fn test_make_householder() {
        for m in [1usize, 2, 5, 17] {
            let x = Mat::with_dims(|_, _| random_value(), m, 1);

            let mut v = x.clone();
            let head = v.as_ref().read(0, 0);
            let mut tail = v.as_mut().submatrix(1, 0, m - 1, 1);
            let mut tail_sq = 0.0;
            for i in 0..m - 1 {
                tail_sq += tail.read(i, 0) * tail.read(i, 0);
            }
            let (tau, beta) = make_householder_in_place(Some(tail.rb_mut()), head, tail_sq);

            let mut applied = x.clone();
            apply_householder_on_the_left(
                applied.as_mut(),
                v.as_ref().submatrix(1, 0, m - 1, 1),
                tau,
                placeholder_stack!(),
            );

            let norm = (head * head + tail_sq).sqrt();
            assert_approx_eq!(beta.abs(), norm, 1e-12);
            assert_approx_eq!(applied[(0, 0)], beta, 1e-12);
            for i in 1..m {
                assert_approx_eq!(applied[(i, 0)], 0.0, 1e-12);
            }
        }
    }

    #[test]
    fn test_block_reflector_matches_reflector_product() {
        for (n, k) in [(5, 5), (8, 3), (12, 12), (16, 4)] {
            let (v, tau) = reflector_basis(n, k);

            let mut t = vec![0.0; k * k];
            build_block_reflector(Direction::Forward, n, k, &v, n, &tau, &mut t, k).unwrap();

            let v_view = MatRef::from_col_major_slice(&v, n, k, n);
            let q = reflector_product(v_view, &tau);

            // I - V * T * Vᵗ with the packed halves materialized
            let v_dense = Mat::with_dims(
                |i, j| {
                    if i > j {
                        v_view.read(i, j)
                    } else if i == j {
                        1.0
                    } else {
                        0.0
                    }
                },
                n,
                k,
            );
            let t_view = MatRef::from_col_major_slice(&t, k, k, k);
            let t_dense = Mat::with_dims(|i, j| if i <= j { t_view.read(i, j) } else { 0.0 }, k, k);

            let mut vt = Mat::<f64>::zeros(n, k);
            matmul(
                vt.as_mut(),
                v_dense.as_ref(),
                t_dense.as_ref(),
                None,
                1.0,
                Parallelism::None,
            );
            let mut reconstructed = Mat::<f64>::identity(n);
            matmul(
                reconstructed.as_mut(),
                vt.as_ref(),
                v_dense.as_ref().transpose(),
                Some(1.0),
                -1.0,
                Parallelism::None,
            );

            let mut max_err: f64 = 0.0;
            let mut max_val: f64 = 0.0;
            for i in 0..n {
                for j in 0..n {
                    max_val = max_val.max(q[(i, j)].abs());
                    max_err = max_err.max((reconstructed[(i, j)] - q[(i, j)]).abs());
                }
            }
            assert!(max_err / max_val < 5000.0 * f64::EPSILON);
        }
    }

    #[test]
    fn test_block_reflector_prefix_validity() {
        // the leading block of T must be the factor of the leading reflectors
        let (n, k) = (10usize, 6usize);
        let (v, tau) = reflector_basis(n, k);

        let mut t_full = vec![0.0; k * k];
        build_block_reflector(Direction::Forward, n, k, &v, n, &tau, &mut t_full, k).unwrap();

        let prefix = 4usize;
        let mut t_prefix = vec![0.0; prefix * prefix];
        build_block_reflector(
            Direction::Forward,
            n,
            prefix,
            &v,
            n,
            &tau,
            &mut t_prefix,
            prefix,
        )
        .unwrap();

        for j in 0..prefix {
            for i in 0..=j {
                assert_eq!(t_prefix[i + j * prefix], t_full[i + j * k]);
            }
        }
    }

    #[test]
    fn test_block_reflector_invalid_sizes() {
        let n = 4usize;
        let k = 3usize;
        let v = vec![0.5; n * k];
        let tau = vec![0.5; k];
        let sentinel = 7.25;

        for (bad_n, bad_k, ldv, ldt) in [
            (0, k, n, k),
            (n, 0, n, k),
            (n, k, n - 1, k),
            (n, k, n, k - 1),
        ] {
            let mut t = vec![sentinel; k * k];
            let result =
                build_block_reflector(Direction::Forward, bad_n, bad_k, &v, ldv, &tau, &mut t, ldt);
            assert_eq!(result, Err(QrError::InvalidSize));
            assert!(t.iter().all(|&x| x == sentinel));

            // same arguments, same status
            let again =
                build_block_reflector(Direction::Forward, bad_n, bad_k, &v, ldv, &tau, &mut t, ldt);
            assert_eq!(again, Err(QrError::InvalidSize));
        }
    }

    #[test]
    fn test_block_reflector_backward_unsupported() {
        let n = 4usize;
        let k = 3usize;
        let v = vec![0.5; n * k];
        let tau = vec![0.5; k];
        let mut t = vec![0.0; k * k];

        let result = build_block_reflector(Direction::Backward, n, k, &v, n, &tau, &mut t, k);
        assert_eq!(result, Err(QrError::Unsupported));

        // invalid sizes take precedence over the direction flag
        let result = build_block_reflector(Direction::Backward, 0, k, &v, n, &tau, &mut t, k);
        assert_eq!(result, Err(QrError::InvalidSize));
    }
}
