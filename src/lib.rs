//! retrograd: reverse-mode automatic differentiation over a parallel
//! computational graph.
//!
//! A graph of tensor nodes — constants, placeholders and arithmetic
//! operations — is evaluated in topological order refined by distance from
//! the outputs, with per-node tasks running on a fixed worker pool.
//! Gradients flow back through the same plan in reverse: each node seeds or
//! sums its upstream delta and records one contribution per child, and
//! broadcasting is inverted by summation so mismatched-shape gradients stay
//! well-defined.
//!
//! ```
//! use retrograd::{Graph, Tensor};
//!
//! let mut graph = Graph::with_defaults();
//! let a = graph.constant(Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap());
//! let b = graph.placeholder();
//! let c = graph.mul(&[a, b]).unwrap();
//!
//! graph.compute(&[(b, Tensor::scalar(2.0))], &[c]).unwrap();
//! graph.gradient().unwrap();
//!
//! assert_eq!(
//!     graph.get_output(c).unwrap(),
//!     Tensor::from_vec(&[2, 2], vec![2.0, 4.0, 6.0, 8.0]).unwrap()
//! );
//! assert_eq!(graph.get_gradient(b).unwrap(), Tensor::scalar(10.0));
//! ```

pub mod backend;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod session;
pub mod tensor;
pub mod types;

pub use errors::{RgError, RgResult};
pub use graph::node::{Node, NodeKind, Op};
pub use graph::results::Results;
pub use graph::Graph;
pub use session::Session;
pub use tensor::Tensor;
pub use types::{Device, GraphId, NodeId, Shape};

#[cfg(test)]
mod tests_math;
