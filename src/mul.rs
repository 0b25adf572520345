//! Matrix multiplication primitives used by the factorization routines.
//!
//! These are reference-grade kernels: the factorization layer treats them as
//! the BLAS-primitive boundary and only relies on their semantics. `dst` is
//! overwritten with `beta * lhs * rhs` when `alpha` is `None`, and
//! accumulated as `alpha * dst + beta * lhs * rhs` otherwise.

use crate::{join_raw, MatMut, MatRef, Parallelism, RealField};
use assert2::assert as fancy_assert;

/// Dense matrix product `dst = [alpha * dst] + beta * lhs * rhs`.
pub fn matmul<T: RealField>(
    dst: MatMut<'_, T>,
    lhs: MatRef<'_, T>,
    rhs: MatRef<'_, T>,
    alpha: Option<T>,
    beta: T,
    parallelism: Parallelism,
) {
    fancy_assert!(dst.nrows() == lhs.nrows());
    fancy_assert!(dst.ncols() == rhs.ncols());
    fancy_assert!(lhs.ncols() == rhs.nrows());
    matmul_impl(dst, lhs, rhs, alpha, beta, parallelism);
}

fn matmul_impl<T: RealField>(
    mut dst: MatMut<'_, T>,
    lhs: MatRef<'_, T>,
    rhs: MatRef<'_, T>,
    alpha: Option<T>,
    beta: T,
    parallelism: Parallelism,
) {
    let m = dst.nrows();
    let n = dst.ncols();
    let depth = lhs.ncols();

    if matches!(parallelism, Parallelism::Rayon(_)) && n > 1 && m * n * depth > 16 * 1024 {
        let (dst_left, dst_right) = dst.split_at_col(n / 2);
        let (rhs_left, rhs_right) = rhs.split_at_col(n / 2);
        join_raw(
            |par| matmul_impl(dst_left, lhs, rhs_left, alpha, beta, par),
            |par| matmul_impl(dst_right, lhs, rhs_right, alpha, beta, par),
            parallelism,
        );
        return;
    }

    for j in 0..n {
        for i in 0..m {
            let mut acc = T::zero();
            for p in 0..depth {
                acc += lhs.read(i, p) * rhs.read(p, j);
            }
            let value = match alpha {
                Some(alpha) => alpha * dst.read(i, j) + beta * acc,
                None => beta * acc,
            };
            dst.write(i, j, value);
        }
    }
}

pub mod triangular {
    use super::*;

    /// Structure of a matrix operand in a [`matmul`] call.
    ///
    /// Triangular structures treat the opposite half of the operand's
    /// storage as zero without reading it as data; unit structures
    /// additionally take the diagonal to be one without reading it.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum BlockStructure {
        Rectangular,
        TriangularLower,
        TriangularUpper,
        UnitTriangularLower,
        UnitTriangularUpper,
    }

    impl BlockStructure {
        #[inline]
        fn read<T: RealField>(self, mat: MatRef<'_, T>, i: usize, j: usize) -> T {
            match self {
                BlockStructure::Rectangular => mat.read(i, j),
                BlockStructure::TriangularLower => {
                    if i >= j {
                        mat.read(i, j)
                    } else {
                        T::zero()
                    }
                }
                BlockStructure::TriangularUpper => {
                    if i <= j {
                        mat.read(i, j)
                    } else {
                        T::zero()
                    }
                }
                BlockStructure::UnitTriangularLower => {
                    if i > j {
                        mat.read(i, j)
                    } else if i == j {
                        T::one()
                    } else {
                        T::zero()
                    }
                }
                BlockStructure::UnitTriangularUpper => {
                    if i < j {
                        mat.read(i, j)
                    } else if i == j {
                        T::one()
                    } else {
                        T::zero()
                    }
                }
            }
        }

        #[inline]
        fn writes(self, i: usize, j: usize) -> bool {
            match self {
                BlockStructure::Rectangular => true,
                BlockStructure::TriangularLower => i >= j,
                BlockStructure::TriangularUpper => i <= j,
                BlockStructure::UnitTriangularLower => i > j,
                BlockStructure::UnitTriangularUpper => i < j,
            }
        }

        #[inline]
        fn is_rectangular(self) -> bool {
            matches!(self, BlockStructure::Rectangular)
        }
    }

    /// Matrix product with structured operands. Only the entries of `dst`
    /// selected by `dst_structure` are written; entries of `lhs` and `rhs`
    /// outside their structure are treated as the implied zeros and ones.
    pub fn matmul<T: RealField>(
        mut dst: MatMut<'_, T>,
        dst_structure: BlockStructure,
        lhs: MatRef<'_, T>,
        lhs_structure: BlockStructure,
        rhs: MatRef<'_, T>,
        rhs_structure: BlockStructure,
        alpha: Option<T>,
        beta: T,
        parallelism: Parallelism,
    ) {
        fancy_assert!(dst.nrows() == lhs.nrows());
        fancy_assert!(dst.ncols() == rhs.ncols());
        fancy_assert!(lhs.ncols() == rhs.nrows());
        fancy_assert!(dst_structure.is_rectangular() || dst.nrows() == dst.ncols());
        fancy_assert!(lhs_structure.is_rectangular() || lhs.nrows() == lhs.ncols());
        fancy_assert!(rhs_structure.is_rectangular() || rhs.nrows() == rhs.ncols());

        if dst_structure.is_rectangular()
            && lhs_structure.is_rectangular()
            && rhs_structure.is_rectangular()
        {
            return super::matmul_impl(dst, lhs, rhs, alpha, beta, parallelism);
        }

        let m = dst.nrows();
        let n = dst.ncols();
        let depth = lhs.ncols();

        for j in 0..n {
            for i in 0..m {
                if !dst_structure.writes(i, j) {
                    continue;
                }
                let mut acc = T::zero();
                for p in 0..depth {
                    acc += lhs_structure.read(lhs, i, p) * rhs_structure.read(rhs, p, j);
                }
                let value = match alpha {
                    Some(alpha) => alpha * dst.read(i, j) + beta * acc,
                    None => beta * acc,
                };
                dst.write(i, j, value);
            }
        }
    }
}
