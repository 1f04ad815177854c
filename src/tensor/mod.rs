pub mod broadcast;
pub mod ops;

use std::sync::OnceLock;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::backend::{Blas, BufferId, BufferMode};
use crate::types::Shape;
use crate::{RgError, RgResult};

/// An n-dimensional tensor of `f32` values in row-major order.
///
/// The backing storage is always contiguous standard layout. A tensor never
/// resizes: shape and length are fixed at construction. Leading `1`
/// dimensions are trimmed when the tensor is built, down to at least the
/// final dimension, so `[1, 1, 3]`, `[1, 3]` and `[3]` all construct the
/// same rank-1 tensor and compare equal.
///
/// The optional device buffer is allocated lazily the first time a BLAS
/// kernel needs this tensor on the device; the backend keeps ownership of
/// all allocations and releases them in bulk at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tensor {
    data: ArrayD<f32>,
    shape: Shape,
    #[serde(skip)]
    device: OnceLock<BufferId>,
}

impl Tensor {
    /// Start building a tensor with the given shape.
    pub fn builder(dims: &[usize]) -> TensorBuilder {
        TensorBuilder {
            dims: dims.to_vec(),
            values: None,
        }
    }

    /// Zero-filled tensor.
    pub fn zeros(dims: &[usize]) -> RgResult<Self> {
        Self::builder(dims).build()
    }

    /// One-filled tensor.
    pub fn ones(dims: &[usize]) -> RgResult<Self> {
        let len = dims.iter().product();
        Self::builder(dims).values(vec![1.0; len]).build()
    }

    /// Rank-1 tensor holding a single value.
    pub fn scalar(value: f32) -> Self {
        // A [1] shape is always valid; the builder cannot fail here.
        match Self::builder(&[1]).values(vec![value]).build() {
            Ok(t) => t,
            Err(_) => unreachable!("scalar construction is infallible"),
        }
    }

    /// Tensor with the given backing values (row-major).
    pub fn from_vec(dims: &[usize], values: Vec<f32>) -> RgResult<Self> {
        Self::builder(dims).values(values).build()
    }

    /// Uniform random tensor in `[-1, 1)`.
    pub fn random(dims: &[usize]) -> RgResult<Self> {
        use ndarray_rand::RandomExt;
        use rand::distributions::Uniform;
        let trimmed = trim_leading_ones(dims);
        validate_dims(&trimmed)?;
        Ok(Self::wrap(ArrayD::random(
            IxDyn(&trimmed),
            Uniform::new(-1.0, 1.0),
        )))
    }

    fn wrap(data: ArrayD<f32>) -> Self {
        let shape = Shape(data.raw_dim());
        Self {
            data,
            shape,
            device: OnceLock::new(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    pub fn rank(&self) -> usize {
        self.shape.ndim()
    }

    pub fn len(&self) -> usize {
        self.shape.size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The backing values in row-major order.
    pub fn values(&self) -> &[f32] {
        self.data
            .as_slice()
            .expect("tensor storage is always standard layout")
    }

    pub fn as_array(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Row-major flat offset of `indices`.
    ///
    /// Indices may carry extra *leading* entries, all of which must be zero:
    /// `[0, 0, i, j]` addresses the same element of a rank-2 tensor as
    /// `[i, j]`. Fewer indices than the rank, or any out-of-range entry, is
    /// a shape error.
    pub fn flat_index(&self, indices: &[usize]) -> RgResult<usize> {
        let shape = self.shape();
        if indices.len() < shape.len() {
            return Err(RgError::Shape(format!(
                "got {} indices for a rank-{} tensor",
                indices.len(),
                shape.len()
            )));
        }
        let extra = indices.len() - shape.len();
        if indices[..extra].iter().any(|&i| i != 0) {
            return Err(RgError::Shape(format!(
                "extra leading indices must be zero, got {:?}",
                &indices[..extra]
            )));
        }
        let mut flat = 0usize;
        for (axis, (&i, &d)) in indices[extra..].iter().zip(shape).enumerate() {
            if i >= d {
                return Err(RgError::Shape(format!(
                    "index {} out of range for axis {} of extent {}",
                    i, axis, d
                )));
            }
            flat = flat * d + i;
        }
        Ok(flat)
    }

    /// Read one element.
    pub fn get(&self, indices: &[usize]) -> RgResult<f32> {
        let flat = self.flat_index(indices)?;
        Ok(self.values()[flat])
    }

    /// Overwrite one element.
    pub fn set(&mut self, indices: &[usize], value: f32) -> RgResult<()> {
        let flat = self.flat_index(indices)?;
        self.values_mut()[flat] = value;
        Ok(())
    }

    /// Add `value` onto one element.
    pub fn add_at(&mut self, indices: &[usize], value: f32) -> RgResult<()> {
        let flat = self.flat_index(indices)?;
        self.values_mut()[flat] += value;
        Ok(())
    }

    /// Overwrite every element.
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    fn values_mut(&mut self) -> &mut [f32] {
        self.data
            .as_slice_mut()
            .expect("tensor storage is always standard layout")
    }

    /// The id of this tensor's device buffer, uploading the values on first
    /// use. The buffer stays registered with the backend until
    /// [`Blas::release_all`] runs.
    pub fn device_buffer(&self, blas: &dyn Blas) -> RgResult<BufferId> {
        if let Some(&id) = self.device.get() {
            return Ok(id);
        }
        let id = blas.alloc(BufferMode::ReadOnly, self.values())?;
        match self.device.set(id) {
            Ok(()) => Ok(id),
            Err(_) => {
                // Another thread uploaded first; keep its buffer.
                blas.free(id)?;
                self.device
                    .get()
                    .copied()
                    .ok_or_else(|| RgError::Backend("device buffer vanished".into()))
            }
        }
    }

    /// True iff any tensor's shape differs from the first tensor's shape.
    pub fn is_dimension_mismatch(tensors: &[&Tensor]) -> bool {
        match tensors.split_first() {
            Some((first, rest)) => rest.iter().any(|t| t.shape() != first.shape()),
            None => false,
        }
    }
}

/// Equality is structural: same (trimmed) shape, bit-identical values.
impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(data: ArrayD<f32>) -> Self {
        let contiguous = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };
        let trimmed = match contiguous.ndim() {
            // 0-d arrays hold exactly one element; treat them as scalars.
            0 => vec![1],
            _ => trim_leading_ones(contiguous.shape()),
        };
        let reshaped = contiguous
            .into_shape(IxDyn(&trimmed))
            .expect("trimming preserves length");
        Self::wrap(reshaped)
    }
}

/// Builder for [`Tensor`]: shape is mandatory, values default to zeros.
pub struct TensorBuilder {
    dims: Vec<usize>,
    values: Option<Vec<f32>>,
}

impl TensorBuilder {
    /// Backing values in row-major order. At least `length` entries are
    /// required; only the first `length` are kept.
    pub fn values(mut self, values: Vec<f32>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn build(self) -> RgResult<Tensor> {
        let dims = trim_leading_ones(&self.dims);
        validate_dims(&dims)?;
        let len: usize = dims.iter().product();
        let values = match self.values {
            Some(mut v) => {
                if v.len() < len {
                    return Err(RgError::Argument(format!(
                        "{} values supplied for a tensor of length {}",
                        v.len(),
                        len
                    )));
                }
                v.truncate(len);
                v
            }
            None => vec![0.0; len],
        };
        let data = ArrayD::from_shape_vec(IxDyn(&dims), values)
            .map_err(|e| RgError::Shape(format!("invalid tensor shape {:?}: {}", dims, e)))?;
        Ok(Tensor::wrap(data))
    }
}

fn validate_dims(dims: &[usize]) -> RgResult<()> {
    if dims.is_empty() {
        return Err(RgError::Argument("tensor shape must not be empty".into()));
    }
    if dims.contains(&0) {
        return Err(RgError::Argument(format!(
            "tensor dimensions must be positive, got {:?}",
            dims
        )));
    }
    Ok(())
}

/// Strip leading 1-axes, always retaining the final dimension.
pub(crate) fn trim_leading_ones(dims: &[usize]) -> Vec<usize> {
    let mut start = 0;
    while start + 1 < dims.len() && dims[start] == 1 {
        start += 1;
    }
    dims[start..].to_vec()
}
