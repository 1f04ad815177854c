//! The BLAS boundary.
//!
//! Linear algebra runs behind the narrow [`Blas`] facade: move a buffer to
//! the device, run a single-precision general matrix multiply, read the
//! result back, release. Everything above this trait is backend-agnostic;
//! [`cpu::CpuBlas`] is always available and [`cuda::CudaBlas`] provides the
//! real device path behind the `cuda` feature.

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;

use crate::tensor::Tensor;
use crate::{RgError, RgResult};

/// Opaque handle to a device-side buffer.
pub type BufferId = u64;

/// Access intent declared at allocation time. Kernels may not write into a
/// [`BufferMode::ReadOnly`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    ReadOnly,
    ReadWrite,
}

/// Buffer movement plus `sgemm`, row-major with per-operand transpose flags.
///
/// Allocations stay registered with the backend until [`Blas::free`] or
/// [`Blas::release_all`]; dropping the backend releases everything.
pub trait Blas: Send + Sync + std::fmt::Debug {
    /// Copy `values` to the device and return a handle to the new buffer.
    fn alloc(&self, mode: BufferMode, values: &[f32]) -> RgResult<BufferId>;

    /// Copy the first `len` values of a buffer back to the host.
    fn read(&self, buffer: BufferId, len: usize) -> RgResult<Vec<f32>>;

    /// Release one buffer.
    fn free(&self, buffer: BufferId) -> RgResult<()>;

    /// Release every buffer still registered. Shutdown hook.
    fn release_all(&self);

    /// `C := op(A) · op(B) + C` in row-major layout, where `op` transposes
    /// its operand iff the matching flag is set. `m`, `n`, `k` are the
    /// output rows, output columns and inner dimension; the leading
    /// dimensions are the stored row strides. Callers wanting a fresh
    /// product must zero-initialize `C`.
    #[allow(clippy::too_many_arguments)]
    fn sgemm(
        &self,
        a: BufferId,
        b: BufferId,
        c: BufferId,
        trans_a: bool,
        trans_b: bool,
        m: usize,
        n: usize,
        k: usize,
        lda: usize,
        ldb: usize,
        ldc: usize,
    ) -> RgResult<()>;
}

/// Full transpose-flagged matrix product on top of the facade: uploads the
/// operands (cached on the tensors), runs one `sgemm` into a zeroed buffer,
/// reads the product back and releases it.
pub fn matmul(
    blas: &dyn Blas,
    a: &Tensor,
    b: &Tensor,
    trans_a: bool,
    trans_b: bool,
) -> RgResult<Tensor> {
    if a.rank() != 2 || b.rank() != 2 {
        return Err(RgError::Shape(format!(
            "matmul requires 2-d operands, got {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }
    let (a_rows, a_cols) = (a.shape()[0], a.shape()[1]);
    let (b_rows, b_cols) = (b.shape()[0], b.shape()[1]);
    let (m, k) = if trans_a { (a_cols, a_rows) } else { (a_rows, a_cols) };
    let (k_b, n) = if trans_b { (b_cols, b_rows) } else { (b_rows, b_cols) };
    if k != k_b {
        return Err(RgError::IncompatibleShapes {
            expected: vec![k, n],
            found: vec![k_b, n],
        });
    }

    let a_buf = a.device_buffer(blas)?;
    let b_buf = b.device_buffer(blas)?;
    let c_buf = blas.alloc(BufferMode::ReadWrite, &vec![0.0; m * n])?;
    let result = blas
        .sgemm(
            a_buf, b_buf, c_buf, trans_a, trans_b, m, n, k, a_cols, b_cols, n,
        )
        .and_then(|()| blas.read(c_buf, m * n));
    blas.free(c_buf)?;
    Tensor::from_vec(&[m, n], result?)
}
