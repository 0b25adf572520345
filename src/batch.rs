//! Batched drivers.
//!
//! A batch is an array of independently owned same-shape matrix buffers,
//! factored with a shared coefficient buffer addressed at multiples of a
//! per-matrix stride. Problems never alias each other, so the driver may
//! dispatch them concurrently in any order; each problem's factorization is
//! identical to a single-matrix call on the same data.

use crate::qr::{
    factor_blocked_req, factor_unblocked_req, qr_in_place_blocked, qr_in_place_unblocked,
    BLOCKSIZE,
};
use crate::{MatMut, Parallelism, QrError, RealField};
use dyn_stack::{DynStack, GlobalMemBuffer};
use rayon::prelude::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Algorithm {
    Unblocked,
    Blocked,
}

fn factorize_batched_impl<T: RealField>(
    m: usize,
    n: usize,
    matrices: &mut [&mut [T]],
    lda: usize,
    tau: &mut [T],
    tau_stride: usize,
    algorithm: Algorithm,
    parallelism: Parallelism,
) -> Result<(), QrError> {
    if m < 1 || n < 1 || lda < m {
        return Err(QrError::InvalidSize);
    }
    let size = m.min(n);
    if tau_stride < size {
        return Err(QrError::InvalidSize);
    }

    let batch_count = matrices.len();
    if batch_count == 0 {
        return Ok(());
    }

    let a_len = lda
        .checked_mul(n - 1)
        .and_then(|len| len.checked_add(m))
        .ok_or(QrError::InvalidSize)?;
    if matrices.iter().any(|a| a.len() < a_len) {
        return Err(QrError::InvalidSize);
    }
    let tau_len = tau_stride
        .checked_mul(batch_count - 1)
        .and_then(|len| len.checked_add(size))
        .ok_or(QrError::InvalidSize)?;
    if tau.len() < tau_len {
        return Err(QrError::InvalidSize);
    }

    let req = match algorithm {
        Algorithm::Unblocked => factor_unblocked_req::<T>(m, n),
        Algorithm::Blocked => factor_blocked_req::<T>(m, n),
    }
    .map_err(|_| QrError::OutOfMemory)?;

    let run = move |a: &mut [T], tau: &mut [T], parallelism: Parallelism| {
        let mut mem = GlobalMemBuffer::new(req);
        let stack = DynStack::new(&mut mem);
        let matrix = MatMut::from_col_major_slice(a, m, n, lda);
        match algorithm {
            Algorithm::Unblocked => qr_in_place_unblocked(matrix, tau, stack),
            Algorithm::Blocked => qr_in_place_blocked(matrix, tau, BLOCKSIZE, parallelism, stack),
        }
    };

    match parallelism {
        Parallelism::None => {
            for (a, tau_chunk) in matrices.iter_mut().zip(tau.chunks_mut(tau_stride)) {
                run(a, tau_chunk, Parallelism::None);
            }
        }
        Parallelism::Rayon(_) => {
            // problems saturate the pool on their own
            matrices
                .par_iter_mut()
                .zip(tau.par_chunks_mut(tau_stride))
                .for_each(|(a, tau_chunk)| run(a, tau_chunk, Parallelism::None));
        }
    }

    Ok(())
}

/// Unblocked QR factorization of every matrix in the batch, with the same
/// per-matrix contract as [`factorize_panel`](crate::factorize_panel).
///
/// The coefficients of matrix `b` are written to
/// `tau[b * tau_stride..b * tau_stride + min(m, n)]`; `tau_stride` must be
/// at least `min(m, n)` so the regions cannot overlap. All preconditions
/// (including every per-matrix buffer length) are validated up front: on
/// [`QrError::InvalidSize`] none of the batch has been read or written. An
/// empty batch is a no-op success.
pub fn factorize_panel_batched<T: RealField>(
    m: usize,
    n: usize,
    matrices: &mut [&mut [T]],
    lda: usize,
    tau: &mut [T],
    tau_stride: usize,
    parallelism: Parallelism,
) -> Result<(), QrError> {
    factorize_batched_impl(
        m,
        n,
        matrices,
        lda,
        tau,
        tau_stride,
        Algorithm::Unblocked,
        parallelism,
    )
}

/// Blocked QR factorization of every matrix in the batch, with the same
/// per-matrix contract as [`factorize_blocked`](crate::factorize_blocked)
/// and the same batch layout and validation as
/// [`factorize_panel_batched`].
pub fn factorize_blocked_batched<T: RealField>(
    m: usize,
    n: usize,
    matrices: &mut [&mut [T]],
    lda: usize,
    tau: &mut [T],
    tau_stride: usize,
    parallelism: Parallelism,
) -> Result<(), QrError> {
    factorize_batched_impl(
        m,
        n,
        matrices,
        lda,
        tau,
        tau_stride,
        Algorithm::Blocked,
        parallelism,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{factorize_blocked, factorize_panel};
    use rand::prelude::*;
    use std::cell::RefCell;

    thread_local! {
        static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
    }

    fn random_value() -> f64 {
        RNG.with(|rng| rng.borrow_mut().gen::<f64>() * 2.0 - 1.0)
    }

    fn random_batch(n: usize, lda: usize, batch_count: usize) -> Vec<Vec<f64>> {
        (0..batch_count)
            .map(|_| (0..lda * n).map(|_| random_value()).collect())
            .collect()
    }

    #[test]
    fn test_batch_matches_single_unblocked() {
        let (m, n, lda, batch_count) = (7usize, 5usize, 9usize, 4usize);
        let tau_stride = 6usize;
        let batch = random_batch(n, lda, batch_count);

        for parallelism in [Parallelism::None, Parallelism::Rayon(4)] {
            let mut batched = batch.clone();
            let mut tau = vec![0.0; tau_stride * batch_count];
            {
                let mut slices = batched
                    .iter_mut()
                    .map(|a| a.as_mut_slice())
                    .collect::<Vec<_>>();
                factorize_panel_batched(m, n, &mut slices, lda, &mut tau, tau_stride, parallelism)
                    .unwrap();
            }

            for b in 0..batch_count {
                let mut single = batch[b].clone();
                let mut tau_single = vec![0.0; m.min(n)];
                factorize_panel(m, n, &mut single, lda, &mut tau_single).unwrap();

                // bit-identical to the single-matrix entry point
                assert_eq!(batched[b], single);
                assert_eq!(
                    &tau[b * tau_stride..b * tau_stride + m.min(n)],
                    &tau_single[..]
                );
            }
        }
    }

    #[test]
    fn test_batch_matches_single_blocked() {
        let (m, n, lda, batch_count) = (40usize, 36usize, 40usize, 3usize);
        let tau_stride = 36usize;
        let batch = random_batch(n, lda, batch_count);

        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            let mut batched = batch.clone();
            let mut tau = vec![0.0; tau_stride * batch_count];
            {
                let mut slices = batched
                    .iter_mut()
                    .map(|a| a.as_mut_slice())
                    .collect::<Vec<_>>();
                factorize_blocked_batched(m, n, &mut slices, lda, &mut tau, tau_stride, parallelism)
                    .unwrap();
            }

            for b in 0..batch_count {
                let mut single = batch[b].clone();
                let mut tau_single = vec![0.0; m.min(n)];
                factorize_blocked(m, n, &mut single, lda, &mut tau_single, Parallelism::None)
                    .unwrap();

                assert_eq!(batched[b], single);
                assert_eq!(
                    &tau[b * tau_stride..b * tau_stride + m.min(n)],
                    &tau_single[..]
                );
            }
        }
    }

    #[test]
    fn test_empty_batch() {
        let mut matrices: Vec<&mut [f64]> = Vec::new();
        let mut tau: Vec<f64> = Vec::new();
        assert_eq!(
            factorize_panel_batched(4, 4, &mut matrices, 4, &mut tau, 4, Parallelism::None),
            Ok(())
        );
        assert_eq!(
            factorize_blocked_batched(4, 4, &mut matrices, 4, &mut tau, 4, Parallelism::None),
            Ok(())
        );
    }

    #[test]
    fn test_batch_invalid_sizes() {
        let (m, n, lda) = (4usize, 4usize, 4usize);
        let mut batch = random_batch(n, lda, 2);
        let orig = batch.clone();
        let mut tau = vec![0.0; 8];

        let mut slices = batch
            .iter_mut()
            .map(|a| a.as_mut_slice())
            .collect::<Vec<_>>();

        // zero dimension
        assert_eq!(
            factorize_panel_batched(0, n, &mut slices, lda, &mut tau, 4, Parallelism::None),
            Err(QrError::InvalidSize)
        );
        // leading dimension below the row count
        assert_eq!(
            factorize_panel_batched(m, n, &mut slices, 3, &mut tau, 4, Parallelism::None),
            Err(QrError::InvalidSize)
        );
        // coefficient regions would overlap
        assert_eq!(
            factorize_blocked_batched(m, n, &mut slices, lda, &mut tau, 3, Parallelism::None),
            Err(QrError::InvalidSize)
        );
        // one member buffer too short
        let mut short = vec![0.0; lda * n - 1];
        let mut mixed: Vec<&mut [f64]> = vec![&mut slices[0][..], &mut short];
        assert_eq!(
            factorize_panel_batched(m, n, &mut mixed, lda, &mut tau, 4, Parallelism::None),
            Err(QrError::InvalidSize)
        );
        drop(mixed);
        drop(slices);

        // none of the batch was processed
        assert_eq!(batch, orig);
        assert!(tau.iter().all(|&x| x == 0.0));
    }
}
