//! The computation graph: node registry, scheduler and executors.
//!
//! Nodes live in an arena owned by the graph and refer to each other by
//! index. Execution order is the topological order refined by distance:
//! `d(n) = min over consumers (d(c) - 1)` with `d = 0` for sink nodes, so
//! nodes furthest upstream of any output dispatch first and independent
//! branches of separate outputs interleave across the worker pool.

pub mod node;
pub mod results;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::backend::cpu::CpuBlas;
use crate::backend::Blas;
use crate::exec::{TaskHandle, WorkerPool};
use crate::tensor::{ops, Tensor};
use crate::types::NodeId;
use crate::{RgError, RgResult};

use node::{Node, NodeKind, Op};
use results::{AdjointMap, Results};

/// Lifecycle of one compute plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanState {
    /// Nodes were registered since the last sort.
    Unsorted,
    /// Execution order is valid, nothing computed yet.
    Sorted,
    /// A forward pass completed.
    Computed,
    /// A gradient pass completed.
    Differentiated,
}

pub struct Graph {
    nodes: Vec<Node>,
    /// Full-graph execution order; valid unless `state` is `Unsorted`.
    order: Vec<NodeId>,
    /// The node sequence actually evaluated by the last forward pass.
    plan: Vec<NodeId>,
    /// How many trailing entries of `plan` are end nodes.
    output_count: usize,
    state: PlanState,
    results: Arc<Results>,
    pool: Arc<WorkerPool>,
    blas: Arc<dyn Blas>,
}

impl Graph {
    pub fn new(pool: Arc<WorkerPool>, blas: Arc<dyn Blas>) -> Self {
        Self {
            nodes: Vec::new(),
            order: Vec::new(),
            plan: Vec::new(),
            output_count: 0,
            state: PlanState::Unsorted,
            results: Arc::new(Results::new()),
            pool,
            blas,
        }
    }

    /// A standalone graph with a CPU backend and a pool sized to the host.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(WorkerPool::with_default_size()),
            Arc::new(CpuBlas::new()),
        )
    }

    // --- Registration ---------------------------------------------------

    /// An immutable tensor payload.
    pub fn constant(&mut self, tensor: Tensor) -> NodeId {
        self.register_leaf(NodeKind::Constant(tensor))
    }

    /// A constant holding a single value.
    pub fn scalar(&mut self, value: f32) -> NodeId {
        self.constant(Tensor::scalar(value))
    }

    /// A per-call input, bound through `compute`'s binding list.
    pub fn placeholder(&mut self) -> NodeId {
        self.register_leaf(NodeKind::Placeholder)
    }

    /// Element-wise n-ary addition of `children`.
    pub fn add(&mut self, children: &[NodeId]) -> RgResult<NodeId> {
        self.register_op(Op::Add, children)
    }

    /// Element-wise n-ary multiplication of `children`.
    pub fn mul(&mut self, children: &[NodeId]) -> RgResult<NodeId> {
        self.register_op(Op::Mul, children)
    }

    /// Matrix product `op(a) · op(b)` with per-operand transpose flags.
    pub fn matmul(
        &mut self,
        transpose_a: bool,
        transpose_b: bool,
        a: NodeId,
        b: NodeId,
    ) -> RgResult<NodeId> {
        self.register_op(
            Op::MatMul {
                transpose_a,
                transpose_b,
            },
            &[a, b],
        )
    }

    fn register_leaf(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            kind,
            children: Vec::new(),
            consumers: Vec::new(),
        });
        self.state = PlanState::Unsorted;
        id
    }

    fn register_op(&mut self, op: Op, children: &[NodeId]) -> RgResult<NodeId> {
        op.validate_arity(children.len())?;
        if let Some(&bad) = children.iter().find(|c| c.0 >= self.nodes.len()) {
            return Err(RgError::GraphShape(format!(
                "child {} is not a node of this graph",
                bad
            )));
        }
        let id = NodeId(self.nodes.len());
        for &child in children {
            // Appended exactly once, even when a child appears at several
            // input positions of the same consumer.
            let consumers = &mut self.nodes[child.0].consumers;
            if !consumers.contains(&id) {
                consumers.push(id);
            }
        }
        self.nodes.push(Node {
            id,
            kind: NodeKind::Op(op),
            children: children.to_vec(),
            consumers: Vec::new(),
        });
        self.state = PlanState::Unsorted;
        Ok(id)
    }

    // --- Accessors ------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn results(&self) -> &Results {
        &self.results
    }

    /// The node sequence the last forward pass evaluated, in dispatch order.
    pub fn execution_plan(&self) -> &[NodeId] {
        &self.plan
    }

    /// Forward output of `id` from the last pass, if it was evaluated.
    pub fn get_output(&self, id: NodeId) -> Option<Tensor> {
        self.results.get_output(id)
    }

    /// Accumulated gradient of `id` from the last gradient pass, if `id`
    /// was in the forward cone.
    pub fn get_gradient(&self, id: NodeId) -> Option<Tensor> {
        self.results.get_gradient(id)
    }

    // --- Sorting --------------------------------------------------------

    fn ensure_sorted(&mut self) -> RgResult<()> {
        if self.state != PlanState::Unsorted {
            return Ok(());
        }
        let topological = self.topological_order()?;
        self.order = self.distance_order(topological);
        self.plan.clear();
        self.output_count = 0;
        self.state = PlanState::Sorted;
        Ok(())
    }

    /// Post-order DFS over the whole arena: children always precede their
    /// consumers. Registration makes cycles unconstructible; the on-stack
    /// check still turns a corrupted arena into an error instead of a hang.
    fn topological_order(&self) -> RgResult<Vec<NodeId>> {
        enum Frame {
            Enter(usize),
            Exit(usize),
        }
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = vec![false; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];
        let mut stack = Vec::new();

        for seed in 0..self.nodes.len() {
            if visited[seed] {
                continue;
            }
            stack.push(Frame::Enter(seed));
            while let Some(frame) = stack.pop() {
                match frame {
                    Frame::Enter(index) => {
                        if visited[index] {
                            continue;
                        }
                        if on_stack[index] {
                            return Err(RgError::GraphShape(format!(
                                "graph is not a DAG: node {} reaches itself",
                                NodeId(index)
                            )));
                        }
                        on_stack[index] = true;
                        stack.push(Frame::Exit(index));
                        for &child in self.nodes[index].children.iter().rev() {
                            if !visited[child.0] {
                                stack.push(Frame::Enter(child.0));
                            }
                        }
                    }
                    Frame::Exit(index) => {
                        on_stack[index] = false;
                        visited[index] = true;
                        order.push(NodeId(index));
                    }
                }
            }
        }
        Ok(order)
    }

    /// Refine a topological order by distance from the outputs. Iterating
    /// the reversed order visits every consumer before its children, so one
    /// pass suffices; the stable sort keeps the topological order between
    /// nodes of equal distance.
    fn distance_order(&self, topological: Vec<NodeId>) -> Vec<NodeId> {
        let mut distance = vec![0i64; self.nodes.len()];
        for &id in topological.iter().rev() {
            let consumers = &self.nodes[id.0].consumers;
            if let Some(min) = consumers.iter().map(|c| distance[c.0] - 1).min() {
                distance[id.0] = min;
            }
        }
        let mut order = topological;
        order.sort_by_key(|id| distance[id.0]);
        order
    }

    /// Every node reachable from `outputs` through child edges.
    fn reachable(&self, outputs: &[NodeId]) -> RgResult<HashSet<usize>> {
        let mut cone = HashSet::new();
        let mut stack = Vec::new();
        for &id in outputs {
            if id.0 >= self.nodes.len() {
                return Err(RgError::GraphShape(format!(
                    "output {} is not a node of this graph",
                    id
                )));
            }
            stack.push(id.0);
        }
        while let Some(index) = stack.pop() {
            if !cone.insert(index) {
                continue;
            }
            for &child in &self.nodes[index].children {
                stack.push(child.0);
            }
        }
        Ok(cone)
    }

    // --- Execution ------------------------------------------------------

    /// Evaluate `outputs` (and everything upstream of them), binding
    /// placeholder values first. Constants and bindings resolve
    /// synchronously; operation nodes are dispatched to the worker pool in
    /// distance order and drained before returning.
    pub fn compute(&mut self, bindings: &[(NodeId, Tensor)], outputs: &[NodeId]) -> RgResult<()> {
        if outputs.is_empty() {
            return Err(RgError::Argument(
                "compute requires at least one output node".into(),
            ));
        }
        let mut end_nodes = Vec::with_capacity(outputs.len());
        for &id in outputs {
            if !end_nodes.contains(&id) {
                end_nodes.push(id);
            }
        }
        self.ensure_sorted()?;
        self.results.clear();
        // A failed pass must not leave the graph looking computed.
        self.plan.clear();
        self.output_count = 0;
        self.state = PlanState::Sorted;

        for (id, tensor) in bindings {
            match self.nodes.get(id.0) {
                Some(node) if matches!(node.kind, NodeKind::Placeholder) => {
                    self.results
                        .insert_output(*id, TaskHandle::completed(tensor.clone()));
                }
                _ => {}
            }
        }

        let cone = self.reachable(&end_nodes)?;
        let plan: Vec<NodeId> = self
            .order
            .iter()
            .copied()
            .filter(|id| cone.contains(&id.0))
            .collect();
        debug!(
            nodes = plan.len(),
            outputs = end_nodes.len(),
            "dispatching forward pass"
        );

        for &id in &plan {
            let node = &self.nodes[id.0];
            match &node.kind {
                NodeKind::Constant(tensor) => {
                    self.results
                        .insert_output(id, TaskHandle::completed(tensor.clone()));
                }
                NodeKind::Placeholder => {
                    if !self.results.has_output(id) {
                        return Err(RgError::Argument(format!(
                            "placeholder {} has no binding",
                            id
                        )));
                    }
                }
                NodeKind::Op(op) => {
                    let op = *op;
                    let children = node.children.clone();
                    let results = Arc::clone(&self.results);
                    let blas = Arc::clone(&self.blas);
                    let handle = self.pool.submit(move || {
                        let inputs = children
                            .iter()
                            .map(|child| results.wait_output(*child))
                            .collect::<RgResult<Vec<_>>>()?;
                        op.forward(&inputs, blas.as_ref())
                    });
                    self.results.insert_output(id, handle);
                }
            }
        }

        for &id in &plan {
            self.results
                .wait_output(id)
                .map_err(|e| RgError::Execution(e.to_string()))?;
        }

        self.plan = plan;
        self.output_count = end_nodes.len();
        self.state = PlanState::Computed;
        Ok(())
    }

    /// Reverse-accumulate gradients over the last forward plan.
    ///
    /// The plan is walked in reverse: the trailing end nodes are seeded
    /// with ones, every other node sums the contributions its consumers
    /// computed for it. Each node's adjoint task records its contribution
    /// to every child plus its own delta, and the drain materializes the
    /// per-node gradients.
    pub fn gradient(&mut self) -> RgResult<()> {
        match self.state {
            PlanState::Computed | PlanState::Differentiated => {}
            _ => {
                return Err(RgError::State(
                    "gradient requires a completed forward pass".into(),
                ));
            }
        }
        self.results.clear_adjoints();
        let plan = self.plan.clone();
        let plan_set: HashSet<usize> = plan.iter().map(|id| id.0).collect();
        let end_from = plan.len() - self.output_count;
        debug!(nodes = plan.len(), "dispatching gradient pass");

        for (position, &id) in plan.iter().enumerate().rev() {
            let is_end = position >= end_from;
            let node = &self.nodes[id.0];
            let op = node.op().copied();
            let children = node.children.clone();
            let consumers: Vec<NodeId> = node
                .consumers
                .iter()
                .copied()
                .filter(|c| plan_set.contains(&c.0))
                .collect();
            let results = Arc::clone(&self.results);
            let blas = Arc::clone(&self.blas);
            let handle = self.pool.submit(move || {
                let output = results.wait_output(id)?;
                let delta = incoming_delta(&results, id, &output, is_end, &consumers)?;
                let mut adjoints = AdjointMap::new();
                if let Some(op) = op {
                    let inputs = children
                        .iter()
                        .map(|child| results.wait_output(*child))
                        .collect::<RgResult<Vec<_>>>()?;
                    let contributions = op.backward(&inputs, &delta, blas.as_ref())?;
                    for (&child, contribution) in children.iter().zip(&contributions) {
                        // A node used twice by the same consumer gets the
                        // sum of both positional contributions.
                        match adjoints.remove(&child) {
                            Some(existing) => {
                                let summed = ops::add(&[&existing, contribution])?;
                                adjoints.insert(child, summed);
                            }
                            None => {
                                adjoints.insert(child, contribution.clone());
                            }
                        }
                    }
                }
                adjoints.insert(id, delta);
                Ok(adjoints)
            });
            self.results.insert_adjoint(id, handle);
        }

        for &id in &plan {
            let adjoints = self
                .results
                .wait_adjoint(id)
                .map_err(|e| RgError::Execution(e.to_string()))?;
            if let Some(gradient) = adjoints.get(&id) {
                self.results.set_gradient(id, gradient.clone());
            }
        }
        self.state = PlanState::Differentiated;
        Ok(())
    }
}

/// The upstream gradient flowing into a node: ones for end nodes, otherwise
/// the sum of every contribution recorded by the node's in-plan consumers.
fn incoming_delta(
    results: &Results,
    id: NodeId,
    output: &Tensor,
    is_end: bool,
    consumers: &[NodeId],
) -> RgResult<Tensor> {
    if is_end {
        return Tensor::ones(output.shape());
    }
    let mut parts = Vec::with_capacity(consumers.len());
    for &consumer in consumers {
        let adjoints = results.wait_adjoint(consumer)?;
        if let Some(contribution) = adjoints.get(&id) {
            parts.push(contribution.clone());
        }
    }
    if parts.is_empty() {
        // No path from here to any output: the gradient is zero.
        return Tensor::zeros(output.shape());
    }
    let refs: Vec<&Tensor> = parts.iter().collect();
    ops::add(&refs)
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("state", &self.state)
            .finish()
    }
}
