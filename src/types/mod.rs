use ndarray::{Dimension, IxDyn};
use serde::{Deserialize, Serialize};

/// Unique identifier for a node in a computation graph.
///
/// Ids are indices into the owning graph's node arena: dense, assigned in
/// registration order, and never reused. An id is only meaningful for the
/// graph that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier for a graph within a [`Session`](crate::session::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub usize);

/// The shape of a tensor. Wrapper around `IxDyn` with a domain-specific API.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Shape(pub IxDyn);

impl Shape {
    pub fn from_slice(dims: &[usize]) -> Self {
        Self(IxDyn(dims))
    }

    pub fn as_slice(&self) -> &[usize] {
        self.0.slice()
    }

    pub fn ndim(&self) -> usize {
        self.0.ndim()
    }

    pub fn size(&self) -> usize {
        self.0.slice().iter().product()
    }
}

impl From<IxDyn> for Shape {
    fn from(ix: IxDyn) -> Self {
        Self(ix)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(IxDyn(&dims))
    }
}

/// A physical device tensors and kernels can live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    #[cfg(feature = "cuda")]
    Cuda(usize),
}
