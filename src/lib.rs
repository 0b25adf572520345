//! Blocked Householder QR factorization with batched drivers.
//!
//! This crate contains:
//! - an unblocked panel factorization that packs Householder vectors below
//!   the diagonal of the input matrix ([`factorize_panel`]),
//! - assembly of the triangular factor of a block reflector, so that a
//!   sequence of reflectors can be applied as a single blocked operation
//!   ([`build_block_reflector`]),
//! - a blocked factorization that amortizes the trailing update over panels
//!   ([`factorize_blocked`]),
//! - batched drivers that factor many independent same-shape matrices
//!   ([`factorize_panel_batched`], [`factorize_blocked_batched`]).
//!
//! Matrices are dense and column major: element `(i, j)` of a matrix with
//! leading dimension `ld` lives at offset `i + j * ld`. All entry points
//! validate their dimension and stride preconditions before touching any
//! buffer, and report violations through [`QrError`] instead of panicking.

#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

use core::fmt;

pub mod batch;
pub mod householder;
pub mod mat;
pub mod mul;
pub mod qr;

pub use batch::{factorize_blocked_batched, factorize_panel_batched};
pub use householder::build_block_reflector;
pub use mat::{Mat, MatMut, MatRef};
pub use qr::{factorize_blocked, factorize_panel};

/// Trait for real scalar types supported by the factorization routines.
pub trait RealField:
    num_traits::Float
    + core::ops::AddAssign
    + core::ops::SubAssign
    + core::ops::MulAssign
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
}

impl RealField for f32 {}
impl RealField for f64 {}

/// Errors reported by the factorization entry points.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QrError {
    /// A dimension, stride, or buffer-length precondition was violated. No
    /// caller buffer has been read or written.
    InvalidSize,
    /// The workspace requirement could not be computed or satisfied.
    OutOfMemory,
    /// The requested option is not supported (backward-direction block
    /// reflector assembly).
    Unsupported,
}

impl fmt::Display for QrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QrError::InvalidSize => f.write_str("invalid matrix dimensions or strides"),
            QrError::OutOfMemory => f.write_str("workspace requirements could not be satisfied"),
            QrError::Unsupported => f.write_str("unsupported option"),
        }
    }
}

impl std::error::Error for QrError {}

/// Direction in which a sequence of elementary reflectors is composed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// `H(1) * H(2) * ... * H(K)`.
    Forward,
    /// `H(K) * ... * H(2) * H(1)`. Declared for interface compatibility,
    /// not implemented.
    Backward,
}

/// Parallelism strategy for the routines that accept one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parallelism {
    /// The code is executed sequentially on the calling thread.
    None,
    /// The code may be executed on the rayon global thread pool, with the
    /// given maximum number of threads. `Rayon(0)` uses
    /// [`rayon::current_num_threads`].
    Rayon(usize),
}

#[inline]
#[doc(hidden)]
pub fn join_raw(
    op_a: impl Send + FnOnce(Parallelism),
    op_b: impl Send + FnOnce(Parallelism),
    parallelism: Parallelism,
) {
    match parallelism {
        Parallelism::None => {
            op_a(parallelism);
            op_b(parallelism);
        }
        Parallelism::Rayon(n_threads) => {
            if n_threads == 1 {
                op_a(Parallelism::None);
                op_b(Parallelism::None);
            } else {
                let n_threads = if n_threads > 0 {
                    n_threads
                } else {
                    rayon::current_num_threads()
                };
                let parallelism = Parallelism::Rayon(n_threads - n_threads / 2);
                rayon::join(|| op_a(parallelism), || op_b(parallelism));
            }
        }
    }
}
