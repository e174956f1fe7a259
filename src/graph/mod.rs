//! The dataflow graph itself: tensor/operator storage, wiring, topological
//! order, and the `data_malloc` bridge into `OffsetAllocator`.
//!
//! Tensors and operators are kept in `HashMap`s keyed by their stable ids,
//! alongside insertion-order `Vec`s — mirroring the original's
//! `vector<shared_ptr<Obj>>` plus independently assigned GUID/FUID counters,
//! so that removing a node never shifts anyone else's id.

pub mod dsl;
pub mod optimizer;
pub mod verifier;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::allocator::OffsetAllocator;
use crate::errors::{GPError, GPResult};
use crate::operator::{OpKind, Operator};
use crate::runtime::Runtime;
use crate::tensor::Tensor;
use crate::types::{ElemType, OperatorId, Shape, TensorId};

/// A static dataflow graph: tensors, operators, and the adjacency between
/// them, plus the allocator used to plan their backing storage.
pub struct Graph {
    runtime: Arc<dyn Runtime>,
    tensors: HashMap<TensorId, Tensor>,
    operators: HashMap<OperatorId, Operator>,
    tensor_order: Vec<TensorId>,
    operator_order: Vec<OperatorId>,
    next_tensor_id: usize,
    next_operator_id: usize,
    allocator: OffsetAllocator,
    /// Set once `data_malloc` has bound every tensor's `DataBlob`. Further
    /// structural mutation is rejected afterwards, matching the allocator's
    /// own freeze-on-`get_ptr` behavior.
    malloced: bool,
    /// Set true on a successful `topo_sort`; cleared by any structural
    /// mutation (tensor/operator insertion or removal) so a stale ordering
    /// is never mistaken for a valid one.
    sorted: bool,
}

impl Graph {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        let allocator = OffsetAllocator::new(Arc::clone(&runtime));
        Self {
            runtime,
            tensors: HashMap::new(),
            operators: HashMap::new(),
            tensor_order: Vec::new(),
            operator_order: Vec::new(),
            next_tensor_id: 0,
            next_operator_id: 0,
            allocator,
            malloced: false,
            sorted: false,
        }
    }

    pub fn allocator(&self) -> &OffsetAllocator {
        &self.allocator
    }

    /// Whether the operator order reflects the last successful `topo_sort`,
    /// with no structural mutation since. Cleared by every insertion or
    /// removal of a tensor or operator.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn tensor(&self, id: TensorId) -> GPResult<&Tensor> {
        self.tensors
            .get(&id)
            .ok_or(GPError::NoSuchId { kind: "tensor", id: id.0 })
    }

    fn tensor_mut(&mut self, id: TensorId) -> GPResult<&mut Tensor> {
        self.tensors
            .get_mut(&id)
            .ok_or(GPError::NoSuchId { kind: "tensor", id: id.0 })
    }

    pub fn operator(&self, id: OperatorId) -> GPResult<&Operator> {
        self.operators
            .get(&id)
            .ok_or(GPError::NoSuchId { kind: "operator", id: id.0 })
    }

    fn operator_mut(&mut self, id: OperatorId) -> GPResult<&mut Operator> {
        self.operators
            .get_mut(&id)
            .ok_or(GPError::NoSuchId { kind: "operator", id: id.0 })
    }

    /// Tensor ids in insertion order. Not the topological order — call
    /// `topo_sort` for that.
    pub fn tensor_ids(&self) -> &[TensorId] {
        &self.tensor_order
    }

    /// Operator ids, in whatever order the last successful `topo_sort` (or
    /// insertion, if none has run yet) left them.
    pub fn operator_ids(&self) -> &[OperatorId] {
        &self.operator_order
    }

    fn fresh_tensor_id(&mut self) -> TensorId {
        let id = TensorId(self.next_tensor_id);
        self.next_tensor_id += 1;
        id
    }

    fn fresh_operator_id(&mut self) -> OperatorId {
        let id = OperatorId(self.next_operator_id);
        self.next_operator_id += 1;
        id
    }

    /// Allocates a fresh tensor under this graph's runtime.
    pub fn add_tensor(&mut self, shape: Shape, dtype: ElemType) -> GPResult<TensorId> {
        self.reject_if_malloced()?;
        let id = self.fresh_tensor_id();
        let tensor = Tensor::new(id, shape, dtype, self.runtime.identity().to_string());
        self.tensors.insert(id, tensor);
        self.tensor_order.push(id);
        self.sorted = false;
        Ok(id)
    }

    /// Adopts a tensor produced elsewhere, rejecting it if it was not
    /// created under this graph's own runtime (spec §4.4's cross-runtime
    /// invariant).
    pub fn add_tensor_existing(&mut self, mut tensor: Tensor) -> GPResult<TensorId> {
        self.reject_if_malloced()?;
        if tensor.runtime_tag() != self.runtime.identity() {
            return Err(GPError::CrossRuntime {
                graph_runtime: self.runtime.identity().to_string(),
                tensor_runtime: tensor.runtime_tag().to_string(),
            });
        }
        let id = self.fresh_tensor_id();
        tensor.id = id;
        self.tensors.insert(id, tensor);
        self.tensor_order.push(id);
        self.sorted = false;
        Ok(id)
    }

    /// Adds an operator and wires it into the tensor graph: every input
    /// tensor gains `op` as a target, every output tensor has its source set
    /// to `op`, and operator-level predecessor/successor caches are updated
    /// both from the inputs' existing sources and from the outputs' existing
    /// targets (a producer can be added after one of its consumers).
    #[instrument(skip(self, kind))]
    pub fn add_operator_and_connect(
        &mut self,
        kind: OpKind,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> GPResult<OperatorId> {
        self.reject_if_malloced()?;
        for &t in inputs.iter().chain(outputs.iter()) {
            self.tensor(t)?;
        }

        let id = self.fresh_operator_id();
        let op = Operator::new(id, kind, inputs.clone(), outputs.clone())?;
        self.operators.insert(id, op);
        self.operator_order.push(id);

        for &input_id in &inputs {
            if let Some(source) = self.tensor(input_id)?.source() {
                self.operator_mut(id)?.add_predecessor(source);
                self.operator_mut(source)?.add_successor(id);
            }
            self.tensor_mut(input_id)?.add_target(id);
        }
        for &output_id in &outputs {
            self.tensor_mut(output_id)?.set_source(id);
            for succ in self.tensor(output_id)?.targets().to_vec() {
                self.operator_mut(id)?.add_successor(succ);
                self.operator_mut(succ)?.add_predecessor(id);
            }
        }
        self.sorted = false;
        debug!(op = id.0, "wired operator");
        Ok(id)
    }

    /// Detaches and removes an operator, unlinking it from every input's
    /// target list and every output's source, and from the
    /// predecessor/successor caches of its neighbors.
    pub fn remove_operator(&mut self, id: OperatorId) -> GPResult<()> {
        self.reject_if_malloced()?;
        let op = self.operator(id)?.clone();
        for &input_id in &op.inputs {
            self.tensor_mut(input_id)?.remove_target(id);
        }
        for &output_id in &op.outputs {
            self.tensor_mut(output_id)?.clear_source();
        }
        for &pred in &op.predecessors {
            if let Ok(pred_op) = self.operator_mut(pred) {
                pred_op.remove_successor(id);
            }
        }
        for &succ in &op.successors {
            if let Ok(succ_op) = self.operator_mut(succ) {
                succ_op.remove_predecessor(id);
            }
        }
        self.operators.remove(&id);
        self.operator_order.retain(|&o| o != id);
        self.sorted = false;
        Ok(())
    }

    /// Removes a tensor that no longer has a source or any targets. Refuses
    /// to remove a tensor still wired into the graph, since that would
    /// silently create a dangling reference from whichever operator still
    /// points to it.
    pub fn remove_tensor(&mut self, id: TensorId) -> GPResult<()> {
        self.reject_if_malloced()?;
        let tensor = self.tensor(id)?;
        if !tensor.is_orphan() {
            return Err(GPError::InvariantViolation(format!(
                "tensor {} is still referenced by its source or targets",
                id.0
            )));
        }
        self.tensors.remove(&id);
        self.tensor_order.retain(|&t| t != id);
        self.sorted = false;
        Ok(())
    }

    /// Kahn-equivalent topological sort by repeated scan-and-restart: an
    /// operator is ready once every input tensor either has no source or has
    /// already been emitted. Reorders `operator_order` in place and returns
    /// it; errors if any operator can never become ready (a cycle).
    #[instrument(skip(self))]
    pub fn topo_sort(&mut self) -> GPResult<Vec<OperatorId>> {
        let mut emitted: Vec<OperatorId> = Vec::with_capacity(self.operator_order.len());
        let mut remaining: Vec<OperatorId> = self.operator_order.clone();

        while !remaining.is_empty() {
            let mut progressed = false;
            let mut next_remaining = Vec::with_capacity(remaining.len());

            for &op_id in &remaining {
                let op = self.operator(op_id)?;
                let ready = op.inputs.iter().all(|&t| match self.tensor(t) {
                    Ok(tensor) => match tensor.source() {
                        Some(src) => emitted.contains(&src),
                        None => true,
                    },
                    Err(_) => true,
                });
                if ready {
                    emitted.push(op_id);
                    progressed = true;
                } else {
                    next_remaining.push(op_id);
                }
            }

            if !progressed {
                return Err(GPError::CyclicGraph(next_remaining.iter().map(|id| id.0).collect()));
            }
            remaining = next_remaining;
        }

        self.operator_order = emitted.clone();
        self.sorted = true;
        Ok(emitted)
    }

    /// Recomputes every tensor's shape from its source operator's
    /// `infer_shape`, walking operators in topological order so each
    /// operator sees already-updated input shapes.
    #[instrument(skip(self))]
    pub fn shape_infer(&mut self) -> GPResult<()> {
        let order = self.topo_sort()?;
        for op_id in order {
            let op = self.operator(op_id)?.clone();
            let input_shapes: Vec<Shape> = op
                .inputs
                .iter()
                .map(|&t| self.tensor(t).map(|t| t.shape().clone()))
                .collect::<GPResult<_>>()?;
            let output_shapes = op.kind.infer_shape(&input_shapes)?;
            if output_shapes.len() != op.outputs.len() {
                return Err(GPError::InvariantViolation(format!(
                    "operator {} produced {} shapes for {} outputs",
                    op_id.0,
                    output_shapes.len(),
                    op.outputs.len()
                )));
            }
            for (&out_id, shape) in op.outputs.iter().zip(output_shapes) {
                self.tensor_mut(out_id)?.set_shape(shape);
            }
        }
        Ok(())
    }

    /// Checks the structural invariants of §3: no orphan tensors, consistent
    /// source/target and input/output membership, and unique ids — see
    /// `verifier::check_valid`.
    pub fn check_valid(&self) -> GPResult<()> {
        verifier::check_valid(self)
    }

    /// Binds every tensor's `DataBlob`: walks tensors in insertion order,
    /// reserving `get_bytes()` from the allocator for each, then realizes the
    /// single backing buffer and binds each tensor's offset against it.
    /// Freezes the graph against further structural mutation.
    #[instrument(skip(self))]
    pub fn data_malloc(&mut self) -> GPResult<()> {
        self.check_valid()?;
        let mut offsets = Vec::with_capacity(self.tensor_order.len());
        for &id in &self.tensor_order {
            let bytes = self.tensor(id)?.get_bytes();
            let offset = self.allocator.alloc(bytes)?;
            offsets.push((id, offset));
        }
        let base = self.allocator.get_ptr()?;
        for (id, offset) in offsets {
            self.tensor_mut(id)?.set_data_blob(crate::tensor::DataBlob { base, offset });
        }
        self.malloced = true;
        debug!(peak = self.allocator.peak(), "data_malloc: bound all tensors");
        Ok(())
    }

    /// Rewires every current consumer of `old` to read `new` instead, and
    /// clears `old`'s own target list — the shared plumbing both rewrites in
    /// `optimizer` use to splice a tensor out of the graph.
    pub(crate) fn retarget_consumers(&mut self, old: TensorId, new: TensorId) -> GPResult<()> {
        let consumers = self.tensor(old)?.targets().to_vec();
        for consumer in consumers {
            self.operator_mut(consumer)?.replace_input(old, new);
            self.tensor_mut(new)?.add_target(consumer);
        }
        self.tensor_mut(old)?.clear_targets();
        Ok(())
    }

    fn reject_if_malloced(&self) -> GPResult<()> {
        if self.malloced {
            Err(GPError::FrozenAllocator)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HeapRuntime;

    fn new_graph() -> Graph {
        Graph::new(Arc::new(HeapRuntime::default()))
    }

    #[test]
    fn wiring_sets_source_and_targets() {
        let mut g = new_graph();
        let a = g.add_tensor(Shape::new(vec![2, 3]), ElemType::F32).unwrap();
        let b = g.add_tensor(Shape::new(vec![3, 4]), ElemType::F32).unwrap();
        let c = g.add_tensor(Shape::new(vec![2, 4]), ElemType::F32).unwrap();
        let op = g
            .add_operator_and_connect(OpKind::MatMul { trans_a: false, trans_b: false }, vec![a, b], vec![c])
            .unwrap();

        assert_eq!(g.tensor(c).unwrap().source(), Some(op));
        assert!(g.tensor(a).unwrap().targets().contains(&op));
        assert!(g.tensor(b).unwrap().targets().contains(&op));
    }

    #[test]
    fn topo_sort_orders_producer_before_consumer() {
        let mut g = new_graph();
        let a = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        let b = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        let c = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        let d = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();

        let op2 = g
            .add_operator_and_connect(OpKind::Transpose { permutation: vec![1, 0] }, vec![c], vec![d])
            .unwrap();
        let op1 = g
            .add_operator_and_connect(OpKind::MatMul { trans_a: false, trans_b: false }, vec![a, b], vec![c])
            .unwrap();

        let order = g.topo_sort().unwrap();
        let pos1 = order.iter().position(|&o| o == op1).unwrap();
        let pos2 = order.iter().position(|&o| o == op2).unwrap();
        assert!(pos1 < pos2);

        // op1 (producer of c) was added after op2 (consumer of c): the
        // successor/predecessor caches must still be wired symmetrically.
        assert!(g.operator(op1).unwrap().successors().contains(&op2));
        assert!(g.operator(op2).unwrap().predecessors().contains(&op1));
    }

    #[test]
    fn topo_sort_detects_cycles() {
        let mut g = new_graph();
        let a = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        let b = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        g.add_operator_and_connect(OpKind::Transpose { permutation: vec![1, 0] }, vec![a], vec![b])
            .unwrap();
        g.add_operator_and_connect(OpKind::Transpose { permutation: vec![1, 0] }, vec![b], vec![a])
            .unwrap();
        // op1 consumes a (produced by op2) and op2 consumes b (produced by
        // op1): neither can ever become ready.
        assert!(matches!(g.topo_sort(), Err(GPError::CyclicGraph(_))));
    }

    #[test]
    fn data_malloc_binds_every_tensor() {
        let mut g = new_graph();
        let a = g.add_tensor(Shape::new(vec![2, 3]), ElemType::F32).unwrap();
        let b = g.add_tensor(Shape::new(vec![3, 4]), ElemType::F32).unwrap();
        let c = g.add_tensor(Shape::new(vec![2, 4]), ElemType::F32).unwrap();
        g.add_operator_and_connect(OpKind::MatMul { trans_a: false, trans_b: false }, vec![a, b], vec![c])
            .unwrap();

        g.data_malloc().unwrap();
        assert!(g.tensor(a).unwrap().data_blob().is_some());
        assert!(g.tensor(b).unwrap().data_blob().is_some());
        assert!(g.tensor(c).unwrap().data_blob().is_some());
        assert!(matches!(g.add_tensor(Shape::new(vec![1]), ElemType::F32), Err(GPError::FrozenAllocator)));
    }

    #[test]
    fn remove_tensor_rejects_still_wired() {
        let mut g = new_graph();
        let a = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        let b = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        g.add_operator_and_connect(OpKind::Transpose { permutation: vec![1, 0] }, vec![a], vec![b])
            .unwrap();
        assert!(g.remove_tensor(a).is_err());
    }

    #[test]
    fn sorted_flag_tracks_topo_sort_and_mutation() {
        let mut g = new_graph();
        assert!(!g.is_sorted());
        let a = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        let b = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        assert!(!g.is_sorted());
        g.add_operator_and_connect(OpKind::Transpose { permutation: vec![1, 0] }, vec![a], vec![b])
            .unwrap();
        assert!(!g.is_sorted());

        g.topo_sort().unwrap();
        assert!(g.is_sorted());

        g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        assert!(!g.is_sorted());
    }
}
