//! Per-node results of the last forward and gradient passes.
//!
//! Keyed by node id: forward outputs as task handles, per-node adjoint
//! contribution maps as task handles, and the accumulated gradients
//! materialized after the gradient drain. The store is shared with worker
//! tasks through an `Arc`; each map is written once per key before the
//! owning phase drains, and read only after the producing task resolves.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::exec::TaskHandle;
use crate::tensor::Tensor;
use crate::types::NodeId;
use crate::{RgError, RgResult};

/// The gradient contributions one node makes, keyed by child id, plus the
/// node's own incoming delta under its own id.
pub type AdjointMap = HashMap<NodeId, Tensor>;

#[derive(Default)]
pub struct Results {
    outputs: Mutex<HashMap<NodeId, TaskHandle<Tensor>>>,
    adjoints: Mutex<HashMap<NodeId, TaskHandle<AdjointMap>>>,
    gradients: Mutex<HashMap<NodeId, Tensor>>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    /// The forward output of `id`, if that node was part of the last
    /// computed cone.
    pub fn get_output(&self, id: NodeId) -> Option<Tensor> {
        let handle = lock(&self.outputs).get(&id).cloned()?;
        handle.wait().ok()
    }

    /// The accumulated gradient of `id`. `None` for nodes outside the last
    /// forward cone or before a gradient pass ran.
    pub fn get_gradient(&self, id: NodeId) -> Option<Tensor> {
        lock(&self.gradients).get(&id).cloned()
    }

    /// Drop everything from previous passes.
    pub fn clear(&self) {
        lock(&self.outputs).clear();
        lock(&self.adjoints).clear();
        lock(&self.gradients).clear();
    }

    pub(crate) fn clear_adjoints(&self) {
        lock(&self.adjoints).clear();
        lock(&self.gradients).clear();
    }

    pub(crate) fn insert_output(&self, id: NodeId, handle: TaskHandle<Tensor>) {
        lock(&self.outputs).insert(id, handle);
    }

    pub(crate) fn has_output(&self, id: NodeId) -> bool {
        lock(&self.outputs).contains_key(&id)
    }

    /// Block until `id`'s forward task resolves.
    pub(crate) fn wait_output(&self, id: NodeId) -> RgResult<Tensor> {
        let handle = lock(&self.outputs)
            .get(&id)
            .cloned()
            .ok_or_else(|| RgError::Execution(format!("no forward result for node {}", id)))?;
        handle.wait()
    }

    pub(crate) fn insert_adjoint(&self, id: NodeId, handle: TaskHandle<AdjointMap>) {
        lock(&self.adjoints).insert(id, handle);
    }

    /// Block until `id`'s adjoint task resolves.
    pub(crate) fn wait_adjoint(&self, id: NodeId) -> RgResult<AdjointMap> {
        let handle = lock(&self.adjoints)
            .get(&id)
            .cloned()
            .ok_or_else(|| RgError::Execution(format!("no adjoint result for node {}", id)))?;
        handle.wait()
    }

    pub(crate) fn set_gradient(&self, id: NodeId, gradient: Tensor) {
        lock(&self.gradients).insert(id, gradient);
    }
}

impl std::fmt::Debug for Results {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Results")
            .field("outputs", &lock(&self.outputs).len())
            .field("adjoints", &lock(&self.adjoints).len())
            .field("gradients", &lock(&self.gradients).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
