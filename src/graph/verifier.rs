//! Structural invariant checking (spec §3): no orphan tensors, consistent
//! tensor↔operator membership, and unique ids.

use std::collections::HashSet;

use crate::errors::{GPError, GPResult};

use super::Graph;

/// Checks that:
/// - no tensor is an orphan (neither produced nor consumed by anything),
/// - every tensor's `source`/`targets` point at operators that really do
///   list that tensor among their outputs/inputs,
/// - every operator's `inputs`/`outputs` point at tensors that really do
///   exist in the graph,
/// - tensor and operator ids are each unique (guaranteed by construction
///   through the `Graph`'s own id counters, but checked here defensively
///   since external callers can hand a `Graph` to this function directly).
pub fn check_valid(graph: &Graph) -> GPResult<()> {
    let mut seen_tensor_ids = HashSet::new();
    for &tensor_id in graph.tensor_ids() {
        if !seen_tensor_ids.insert(tensor_id) {
            return Err(GPError::InvariantViolation(format!("duplicate tensor id {}", tensor_id.0)));
        }
        let tensor = graph.tensor(tensor_id)?;
        if tensor.is_orphan() {
            return Err(GPError::InvariantViolation(format!("tensor {} is an orphan", tensor_id.0)));
        }
        if let Some(source) = tensor.source() {
            let op = graph.operator(source)?;
            if !op.outputs.contains(&tensor_id) {
                return Err(GPError::InvariantViolation(format!(
                    "tensor {} claims source {} but is not among its outputs",
                    tensor_id.0, source.0
                )));
            }
        }
        for &target in tensor.targets() {
            let op = graph.operator(target)?;
            if !op.inputs.contains(&tensor_id) {
                return Err(GPError::InvariantViolation(format!(
                    "tensor {} claims target {} but is not among its inputs",
                    tensor_id.0, target.0
                )));
            }
        }
    }

    let mut seen_operator_ids = HashSet::new();
    for &op_id in graph.operator_ids() {
        if !seen_operator_ids.insert(op_id) {
            return Err(GPError::InvariantViolation(format!("duplicate operator id {}", op_id.0)));
        }
        let op = graph.operator(op_id)?;
        for &input in &op.inputs {
            graph.tensor(input).map_err(|_| {
                GPError::InvariantViolation(format!("operator {} references missing input tensor {}", op_id.0, input.0))
            })?;
        }
        for &output in &op.outputs {
            graph.tensor(output).map_err(|_| {
                GPError::InvariantViolation(format!("operator {} references missing output tensor {}", op_id.0, output.0))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::operator::OpKind;
    use crate::runtime::HeapRuntime;
    use crate::types::{ElemType, Shape};

    fn new_graph() -> Graph {
        Graph::new(Arc::new(HeapRuntime::default()))
    }

    #[test]
    fn wired_graph_is_valid() {
        let mut g = new_graph();
        let a = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        let b = g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        g.add_operator_and_connect(OpKind::Transpose { permutation: vec![1, 0] }, vec![a], vec![b])
            .unwrap();
        assert!(check_valid(&g).is_ok());
    }

    #[test]
    fn orphan_tensor_is_invalid() {
        let mut g = new_graph();
        g.add_tensor(Shape::new(vec![2, 2]), ElemType::F32).unwrap();
        assert!(check_valid(&g).is_err());
    }
}
