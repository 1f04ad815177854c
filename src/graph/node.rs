//! The node model: tagged variants with forward and adjoint contracts.
//!
//! Operations are a closed enum rather than trait objects; forward and
//! backward are pattern matches. A node's `backward` contract is expressed
//! per child: given the inputs and the incoming delta, it yields one
//! gradient contribution per child position.

use crate::backend::{self, Blas};
use crate::tensor::{ops, Tensor};
use crate::types::NodeId;
use crate::{RgError, RgResult};

/// An arithmetic operation over child outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Element-wise n-ary addition.
    Add,
    /// Element-wise n-ary multiplication.
    Mul,
    /// 2-d matrix product with per-operand transpose flags.
    MatMul {
        transpose_a: bool,
        transpose_b: bool,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Add => "Add",
            Op::Mul => "Mul",
            Op::MatMul { .. } => "MatMul",
        }
    }

    pub(crate) fn validate_arity(&self, children: usize) -> RgResult<()> {
        match self {
            Op::Add | Op::Mul => {
                if children == 0 {
                    return Err(RgError::Argument(format!(
                        "{} requires at least one input",
                        self.name()
                    )));
                }
            }
            Op::MatMul { .. } => {
                if children != 2 {
                    return Err(RgError::Argument(format!(
                        "MatMul requires exactly two inputs, got {}",
                        children
                    )));
                }
            }
        }
        Ok(())
    }

    /// This node's output, given its children's outputs in child order.
    pub fn forward(&self, inputs: &[Tensor], blas: &dyn Blas) -> RgResult<Tensor> {
        self.validate_arity(inputs.len())?;
        let refs: Vec<&Tensor> = inputs.iter().collect();
        match self {
            Op::Add => ops::add(&refs),
            Op::Mul => ops::mul(&refs),
            Op::MatMul {
                transpose_a,
                transpose_b,
            } => backend::matmul(blas, refs[0], refs[1], *transpose_a, *transpose_b),
        }
    }

    /// Gradient contributions to each child, in child order. `delta` is the
    /// upstream gradient flowing into this node and always has the output's
    /// shape.
    pub fn backward(
        &self,
        inputs: &[Tensor],
        delta: &Tensor,
        blas: &dyn Blas,
    ) -> RgResult<Vec<Tensor>> {
        self.validate_arity(inputs.len())?;
        match self {
            Op::Add => inputs
                .iter()
                .map(|child| Tensor::unbroadcast(delta, child.shape()))
                .collect(),
            Op::Mul => {
                // The factors must be the broadcasted operands: the raw
                // stored outputs are shape-wrong under broadcasting.
                let refs: Vec<&Tensor> = inputs.iter().collect();
                let factors = Tensor::broadcast(&refs)?;
                let mut contributions = Vec::with_capacity(inputs.len());
                for (index, child) in inputs.iter().enumerate() {
                    // delta times the product of every other factor; stays
                    // finite when this child holds zeros.
                    let mut term: Vec<&Tensor> = vec![delta];
                    for (other, factor) in factors.iter().enumerate() {
                        if other != index {
                            term.push(factor);
                        }
                    }
                    let scaled = ops::mul(&term)?;
                    contributions.push(Tensor::unbroadcast(&scaled, child.shape())?);
                }
                Ok(contributions)
            }
            Op::MatMul {
                transpose_a,
                transpose_b,
            } => {
                let (a, b) = (&inputs[0], &inputs[1]);
                let (ta, tb) = (*transpose_a, *transpose_b);
                // With C = op(A)·op(B): dA = δ·op(B)ᵀ and dB = op(A)ᵀ·δ,
                // transposed once more when the stored operand is the
                // transposed one.
                let grad_a = if ta {
                    backend::matmul(blas, b, delta, tb, true)?
                } else {
                    backend::matmul(blas, delta, b, false, !tb)?
                };
                let grad_b = if tb {
                    backend::matmul(blas, delta, a, true, ta)?
                } else {
                    backend::matmul(blas, a, delta, !ta, false)?
                };
                Ok(vec![grad_a, grad_b])
            }
        }
    }
}

/// What a node is: an immutable payload, a per-call input, or an operation.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Constant(Tensor),
    Placeholder,
    Op(Op),
}

/// One node of a graph's arena.
///
/// `children` are this node's inputs in definition order; `consumers` are
/// the back-edges, appended exactly once when a consumer registers. Both
/// sides are plain indices, so the DAG has no ownership cycles.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
    pub consumers: Vec<NodeId>,
}

impl Node {
    pub fn op(&self) -> Option<&Op> {
        match &self.kind {
            NodeKind::Op(op) => Some(op),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            NodeKind::Constant(_) => "Constant",
            NodeKind::Placeholder => "Placeholder",
            NodeKind::Op(op) => op.name(),
        }
    }
}
