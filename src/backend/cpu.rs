//! Host-memory reference implementation of the BLAS facade.
//!
//! "Device" buffers are plain `Vec<f32>`s in a registry, so the buffer
//! discipline of the engine (upload, compute, read back, release) is
//! exercised even without a GPU. The sgemm kernel is a straightforward
//! row-major triple loop, row-parallel when the `rayon` feature is on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::{Blas, BufferId, BufferMode};
use crate::{RgError, RgResult};

struct CpuBuffer {
    mode: BufferMode,
    values: Arc<RwLock<Vec<f32>>>,
}

#[derive(Default)]
pub struct CpuBlas {
    buffers: Mutex<HashMap<BufferId, CpuBuffer>>,
    next_id: AtomicU64,
}

impl CpuBlas {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self, id: BufferId) -> RgResult<(BufferMode, Arc<RwLock<Vec<f32>>>)> {
        lock_registry(&self.buffers)
            .get(&id)
            .map(|b| (b.mode, Arc::clone(&b.values)))
            .ok_or_else(|| RgError::Backend(format!("unknown buffer {}", id)))
    }
}

impl std::fmt::Debug for CpuBlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuBlas")
            .field("buffers", &lock_registry(&self.buffers).len())
            .finish()
    }
}

impl Blas for CpuBlas {
    fn alloc(&self, mode: BufferMode, values: &[f32]) -> RgResult<BufferId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock_registry(&self.buffers).insert(
            id,
            CpuBuffer {
                mode,
                values: Arc::new(RwLock::new(values.to_vec())),
            },
        );
        Ok(id)
    }

    fn read(&self, buffer: BufferId, len: usize) -> RgResult<Vec<f32>> {
        let (_, buf) = self.buffer(buffer)?;
        let values = buf.read().unwrap_or_else(|e| e.into_inner());
        if values.len() < len {
            return Err(RgError::Backend(format!(
                "buffer {} holds {} values, {} requested",
                buffer,
                values.len(),
                len
            )));
        }
        Ok(values[..len].to_vec())
    }

    fn free(&self, buffer: BufferId) -> RgResult<()> {
        lock_registry(&self.buffers)
            .remove(&buffer)
            .map(|_| ())
            .ok_or_else(|| RgError::Backend(format!("unknown buffer {}", buffer)))
    }

    fn release_all(&self) {
        lock_registry(&self.buffers).clear();
    }

    // A, B and C must be distinct buffers.
    #[tracing::instrument(skip(self), name = "kernel_sgemm")]
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
    ) -> RgResult<()> {
        let (_, a_buf) = self.buffer(a)?;
        let (_, b_buf) = self.buffer(b)?;
        let (c_mode, c_buf) = self.buffer(c)?;
        if c_mode == BufferMode::ReadOnly {
            return Err(RgError::Backend(format!(
                "buffer {} is read-only, cannot be used as sgemm output",
                c
            )));
        }
        let a_vals = a_buf.read().unwrap_or_else(|e| e.into_inner());
        let b_vals = b_buf.read().unwrap_or_else(|e| e.into_inner());
        let mut c_vals = c_buf.write().unwrap_or_else(|e| e.into_inner());

        let a_needed = if trans_a { k * lda } else { m * lda };
        let b_needed = if trans_b { n * ldb } else { k * ldb };
        if ldc < n || a_vals.len() < a_needed || b_vals.len() < b_needed || c_vals.len() < m * ldc {
            return Err(RgError::Backend(format!(
                "sgemm operand too small for m={} n={} k={}",
                m, n, k
            )));
        }

        let row_kernel = |i: usize, row: &mut [f32]| {
            for j in 0..n {
                let mut acc = 0.0f32;
                for l in 0..k {
                    let a_val = if trans_a {
                        a_vals[l * lda + i]
                    } else {
                        a_vals[i * lda + l]
                    };
                    let b_val = if trans_b {
                        b_vals[j * ldb + l]
                    } else {
                        b_vals[l * ldb + j]
                    };
                    acc += a_val * b_val;
                }
                row[j] += acc;
            }
        };

        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            c_vals
                .par_chunks_mut(ldc)
                .take(m)
                .enumerate()
                .for_each(|(i, row)| row_kernel(i, row));
        }
        #[cfg(not(feature = "rayon"))]
        {
            for (i, row) in c_vals.chunks_mut(ldc).take(m).enumerate() {
                row_kernel(i, row);
            }
        }
        Ok(())
    }
}

fn lock_registry<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
