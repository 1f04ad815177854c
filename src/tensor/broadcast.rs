//! Broadcasting and its inverse.
//!
//! Broadcasting is NumPy-style and right-aligned: shapes are padded with
//! leading 1s to a common rank, and every axis either matches the broadcast
//! extent or has extent 1 and wraps. Un-broadcasting sums a tensor back down
//! to an earlier shape, which is exactly the adjoint of broadcasting and is
//! what makes gradients of mismatched-shape operations well-defined.

use super::{trim_leading_ones, Tensor};
use crate::{RgError, RgResult};

impl Tensor {
    /// Broadcast all tensors to their common shape.
    ///
    /// Returns freshly allocated tensors in input order. Fails when any pair
    /// of corresponding axes disagrees with the broadcast extent.
    pub fn broadcast(tensors: &[&Tensor]) -> RgResult<Vec<Tensor>> {
        if tensors.is_empty() {
            return Err(RgError::Argument("broadcast of zero tensors".into()));
        }
        let rank = tensors.iter().map(|t| t.rank()).max().unwrap_or(1);
        let padded: Vec<Vec<usize>> = tensors.iter().map(|t| pad_left(t.shape(), rank)).collect();
        let out_shape = broadcast_extents(tensors, &padded, rank)?;
        let out_len: usize = out_shape.iter().product();

        let mut out = Vec::with_capacity(tensors.len());
        for (tensor, dims) in tensors.iter().zip(&padded) {
            if dims == &out_shape {
                out.push((*tensor).clone());
                continue;
            }
            let strides = row_major_strides(dims);
            let src = tensor.values();
            let mut values = Vec::with_capacity(out_len);
            for flat in 0..out_len {
                let mut rem = flat;
                let mut offset = 0;
                for axis in (0..rank).rev() {
                    let coord = rem % out_shape[axis];
                    rem /= out_shape[axis];
                    // Size-1 axes wrap back to their only entry.
                    offset += (coord % dims[axis]) * strides[axis];
                }
                values.push(src[offset]);
            }
            out.push(Tensor::from_vec(&out_shape, values)?);
        }
        Ok(out)
    }

    /// Sum `tensor` along every axis broadcasting would have replicated to
    /// reach it from `target_shape`: axes (counted from the right) where the
    /// extents differ, and axes `target_shape` does not have at all. Returns
    /// the input unchanged when no axis qualifies.
    pub fn unbroadcast(tensor: &Tensor, target_shape: &[usize]) -> RgResult<Tensor> {
        let target = trim_leading_ones(target_shape);
        let shape = tensor.shape();
        let mut axes = Vec::new();
        for offset in 0..shape.len() {
            let axis = shape.len() - 1 - offset;
            match target.len().checked_sub(offset + 1) {
                Some(t_axis) if target[t_axis] == shape[axis] => {}
                _ => axes.push(axis),
            }
        }
        if axes.is_empty() {
            return Ok(tensor.clone());
        }
        tensor.sum_axes(&axes)
    }

    /// Sum along `axes`, keeping rank: each summed axis collapses to
    /// extent 1 (and leading 1s then trim as in any construction).
    pub fn sum_axes(&self, axes: &[usize]) -> RgResult<Tensor> {
        let shape = self.shape();
        if let Some(&bad) = axes.iter().find(|&&a| a >= shape.len()) {
            return Err(RgError::Shape(format!(
                "axis {} out of range for rank-{} tensor",
                bad,
                shape.len()
            )));
        }
        let mut out_dims = shape.to_vec();
        for &axis in axes {
            out_dims[axis] = 1;
        }
        let out_strides = row_major_strides(&out_dims);
        let mut values = vec![0.0f32; out_dims.iter().product()];
        for (flat, &v) in self.values().iter().enumerate() {
            let mut rem = flat;
            let mut offset = 0;
            for axis in (0..shape.len()).rev() {
                let coord = rem % shape[axis];
                rem /= shape[axis];
                if out_dims[axis] != 1 {
                    offset += coord * out_strides[axis];
                }
            }
            values[offset] += v;
        }
        Tensor::from_vec(&out_dims, values)
    }
}

/// Broadcast extent per axis: the first non-1 extent across the operands;
/// every other operand must match it or be 1.
fn broadcast_extents(
    tensors: &[&Tensor],
    padded: &[Vec<usize>],
    rank: usize,
) -> RgResult<Vec<usize>> {
    let mut out = vec![1usize; rank];
    for axis in 0..rank {
        let mut extent = 1;
        let mut owner = 0;
        for (k, dims) in padded.iter().enumerate() {
            if dims[axis] != 1 {
                extent = dims[axis];
                owner = k;
                break;
            }
        }
        for (k, dims) in padded.iter().enumerate() {
            if dims[axis] != 1 && dims[axis] != extent {
                return Err(RgError::IncompatibleShapes {
                    expected: tensors[owner].shape().to_vec(),
                    found: tensors[k].shape().to_vec(),
                });
            }
        }
        out[axis] = extent;
    }
    Ok(out)
}

fn pad_left(shape: &[usize], rank: usize) -> Vec<usize> {
    let mut padded = vec![1usize; rank - shape.len()];
    padded.extend_from_slice(shape);
    padded
}

fn row_major_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * dims[axis + 1];
    }
    strides
}
