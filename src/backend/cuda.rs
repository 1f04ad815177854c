//! cuBLAS implementation of the BLAS facade.
//!
//! Buffers are `CudaSlice<f32>` allocations in a registry keyed like the CPU
//! backend's. cuBLAS is column-major while tensors here are row-major, so
//! `C = op(A)·op(B)` is dispatched as the column-major `Cᵀ = op(B)ᵀ·op(A)ᵀ`
//! by swapping the operand order and dimensions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cudarc::cublas::sys::cublasOperation_t;
use cudarc::cublas::{Gemm, GemmConfig};
use cudarc::driver::{CudaDevice, CudaSlice};

use super::{Blas, BufferId, BufferMode};
use crate::{RgError, RgResult};

pub struct CudaBlas {
    device: Arc<CudaDevice>,
    device_index: usize,
    blas: cudarc::cublas::CudaBlas,
    buffers: Mutex<HashMap<BufferId, CudaSlice<f32>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for CudaBlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaBlas")
            .field("device", &self.device_index)
            .finish()
    }
}

impl CudaBlas {
    pub fn new(device_index: usize) -> RgResult<Self> {
        let device = CudaDevice::new(device_index).map_err(|e| {
            RgError::Backend(format!(
                "failed to initialize CUDA device {}: {:?}",
                device_index, e
            ))
        })?;
        let blas = cudarc::cublas::CudaBlas::new(device.clone())
            .map_err(|e| RgError::Backend(format!("failed to initialize cuBLAS: {:?}", e)))?;
        Ok(Self {
            device,
            device_index,
            blas,
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }
}

impl Blas for CudaBlas {
    // CUDA has no per-allocation access flags; the mode is advisory here.
    fn alloc(&self, _mode: BufferMode, values: &[f32]) -> RgResult<BufferId> {
        let slice = self
            .device
            .htod_copy(values.to_vec())
            .map_err(|e| RgError::Backend(format!("CUDA HtoD copy failed: {:?}", e)))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, slice);
        Ok(id)
    }

    fn read(&self, buffer: BufferId, len: usize) -> RgResult<Vec<f32>> {
        let guard = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        let slice = guard
            .get(&buffer)
            .ok_or_else(|| RgError::Backend(format!("unknown buffer {}", buffer)))?;
        let values = self
            .device
            .dtoh_sync_copy(slice)
            .map_err(|e| RgError::Backend(format!("CUDA DtoH copy failed: {:?}", e)))?;
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
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&buffer)
            .map(|_| ())
            .ok_or_else(|| RgError::Backend(format!("unknown buffer {}", buffer)))
    }

    fn release_all(&self) {
        self.buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

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
        let op_a = if trans_a {
            cublasOperation_t::CUBLAS_OP_T
        } else {
            cublasOperation_t::CUBLAS_OP_N
        };
        let op_b = if trans_b {
            cublasOperation_t::CUBLAS_OP_T
        } else {
            cublasOperation_t::CUBLAS_OP_N
        };

        let mut guard = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        let mut c_slice = guard
            .remove(&c)
            .ok_or_else(|| RgError::Backend(format!("unknown buffer {}", c)))?;
        let run = (|| {
            let a_slice = guard
                .get(&a)
                .ok_or_else(|| RgError::Backend(format!("unknown buffer {}", a)))?;
            let b_slice = guard
                .get(&b)
                .ok_or_else(|| RgError::Backend(format!("unknown buffer {}", b)))?;
            // Row-major C is column-major Cᵀ, hence the swapped operands,
            // swapped flags and (n, m) dimensions.
            let cfg = GemmConfig {
                transa: op_b,
                transb: op_a,
                m: n as i32,
                n: m as i32,
                k: k as i32,
                alpha: 1.0f32,
                lda: ldb as i32,
                ldb: lda as i32,
                beta: 1.0f32,
                ldc: ldc as i32,
            };
            unsafe { self.blas.gemm(cfg, b_slice, a_slice, &mut c_slice) }
                .map_err(|e| RgError::Backend(format!("cuBLAS sgemm failed: {:?}", e)))
        })();
        guard.insert(c, c_slice);
        run
    }
}
