//! Element-wise tensor arithmetic.
//!
//! Every operation broadcasts its inputs to a common shape first and then
//! folds by flat index. Addition and multiplication are n-ary with the usual
//! identities; subtraction and division left-fold from the first operand.

use super::Tensor;
use crate::{RgError, RgResult};

/// Element-wise sum of all inputs.
pub fn add(inputs: &[&Tensor]) -> RgResult<Tensor> {
    let operands = broadcast_operands("add", inputs)?;
    let mut acc = vec![0.0f32; operands[0].len()];
    for t in &operands {
        for (a, &v) in acc.iter_mut().zip(t.values()) {
            *a += v;
        }
    }
    Tensor::from_vec(operands[0].shape(), acc)
}

/// Element-wise product of all inputs.
pub fn mul(inputs: &[&Tensor]) -> RgResult<Tensor> {
    let operands = broadcast_operands("mul", inputs)?;
    let mut acc = vec![1.0f32; operands[0].len()];
    for t in &operands {
        for (a, &v) in acc.iter_mut().zip(t.values()) {
            *a *= v;
        }
    }
    Tensor::from_vec(operands[0].shape(), acc)
}

/// First operand minus every following operand.
pub fn sub(inputs: &[&Tensor]) -> RgResult<Tensor> {
    let operands = broadcast_operands("sub", inputs)?;
    let mut acc = operands[0].values().to_vec();
    for t in &operands[1..] {
        for (a, &v) in acc.iter_mut().zip(t.values()) {
            *a -= v;
        }
    }
    Tensor::from_vec(operands[0].shape(), acc)
}

/// First operand divided by every following operand.
pub fn div(inputs: &[&Tensor]) -> RgResult<Tensor> {
    let operands = broadcast_operands("div", inputs)?;
    let mut acc = operands[0].values().to_vec();
    for t in &operands[1..] {
        for (a, &v) in acc.iter_mut().zip(t.values()) {
            *a /= v;
        }
    }
    Tensor::from_vec(operands[0].shape(), acc)
}

fn broadcast_operands(op: &str, inputs: &[&Tensor]) -> RgResult<Vec<Tensor>> {
    if inputs.is_empty() {
        return Err(RgError::Argument(format!("{} of zero tensors", op)));
    }
    Tensor::broadcast(inputs)
}

// Operator sugar for tests and call sites that know their shapes line up.
// Shape errors panic here; fallible code goes through the functions above.

impl std::ops::Add for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: Self) -> Tensor {
        add(&[self, rhs]).expect("incompatible shapes in tensor addition")
    }
}

impl std::ops::Sub for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: Self) -> Tensor {
        sub(&[self, rhs]).expect("incompatible shapes in tensor subtraction")
    }
}

impl std::ops::Mul for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: Self) -> Tensor {
        mul(&[self, rhs]).expect("incompatible shapes in tensor multiplication")
    }
}

impl std::ops::Div for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: Self) -> Tensor {
        div(&[self, rhs]).expect("incompatible shapes in tensor division")
    }
}

impl std::ops::Mul<f32> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: f32) -> Tensor {
        &Tensor::scalar(rhs) * self
    }
}
