//! Session: ownership of graphs, the worker pool and the BLAS backend.
//!
//! The engine this crate derives from kept a process-wide list of graphs, a
//! current-graph pointer and a shutdown hook. Here that state is an explicit
//! value: a session owns its graphs and the execution resources they share,
//! and dropping it is the shutdown hook — the pool drains and joins, the
//! backend releases every registered device buffer.

use std::sync::Arc;

use crate::backend::cpu::CpuBlas;
use crate::backend::Blas;
use crate::exec::WorkerPool;
use crate::graph::Graph;
use crate::types::GraphId;
use crate::{RgError, RgResult};

pub struct Session {
    graphs: Vec<Graph>,
    current: usize,
    pool: Arc<WorkerPool>,
    blas: Arc<dyn Blas>,
}

impl Session {
    /// CPU backend, pool sized to the host's logical processors.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(CpuBlas::new()))
    }

    pub fn with_backend(blas: Arc<dyn Blas>) -> Self {
        Self::build(Arc::new(WorkerPool::with_default_size()), blas)
    }

    /// CPU backend with an explicit worker count.
    pub fn with_threads(threads: usize) -> Self {
        Self::build(Arc::new(WorkerPool::new(threads)), Arc::new(CpuBlas::new()))
    }

    fn build(pool: Arc<WorkerPool>, blas: Arc<dyn Blas>) -> Self {
        let mut session = Self {
            graphs: Vec::new(),
            current: 0,
            pool,
            blas,
        };
        let initial = session.make_graph();
        session.graphs.push(initial);
        session
    }

    fn make_graph(&self) -> Graph {
        Graph::new(Arc::clone(&self.pool), Arc::clone(&self.blas))
    }

    /// Register a fresh graph. The current graph is unchanged.
    pub fn new_graph(&mut self) -> GraphId {
        let id = GraphId(self.graphs.len());
        let graph = self.make_graph();
        self.graphs.push(graph);
        id
    }

    /// The graph created with the session.
    pub fn default_graph(&mut self) -> &mut Graph {
        &mut self.graphs[0]
    }

    pub fn current(&self) -> &Graph {
        &self.graphs[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Graph {
        &mut self.graphs[self.current]
    }

    pub fn current_id(&self) -> GraphId {
        GraphId(self.current)
    }

    pub fn set_current(&mut self, id: GraphId) -> RgResult<()> {
        if id.0 >= self.graphs.len() {
            return Err(RgError::Argument(format!(
                "no graph with id {} in this session",
                id.0
            )));
        }
        self.current = id.0;
        Ok(())
    }

    pub fn graph(&self, id: GraphId) -> Option<&Graph> {
        self.graphs.get(id.0)
    }

    pub fn graph_mut(&mut self, id: GraphId) -> Option<&mut Graph> {
        self.graphs.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Drop every graph and device buffer, leaving one fresh default graph.
    pub fn clear_all(&mut self) {
        self.graphs.clear();
        self.blas.release_all();
        self.current = 0;
        let fresh = self.make_graph();
        self.graphs.push(fresh);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.blas.release_all();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("graphs", &self.graphs.len())
            .field("current", &self.current)
            .field("workers", &self.pool.size())
            .finish()
    }
}
