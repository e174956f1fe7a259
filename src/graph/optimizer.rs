//! Algebraic graph rewrites: transpose fusion (R1) and transpose-into-matmul
//! absorption (R2), driven to a fixed point.
//!
//! Each rewrite function scans operators in their current order, applies the
//! first match it finds, and returns whether it changed anything. `optimize`
//! restarts the scan from scratch after every successful rewrite rather than
//! continuing mid-scan, since removing operators invalidates any index into
//! the scan that was already in flight.

use crate::errors::GPResult;
use crate::operator::OpKind;

use super::Graph;

/// Runs R1 and R2 to a fixed point. Requires the graph to already be
/// acyclic; a cyclic graph is reported rather than silently left unoptimized.
pub fn optimize(graph: &mut Graph) -> GPResult<()> {
    graph.topo_sort()?;
    loop {
        let mut changed = fuse_transposes(graph)?;
        if !changed {
            changed = absorb_transpose_into_matmul(graph)?;
        }
        if !changed {
            break;
        }
    }
    Ok(())
}

/// R1: `Transpose(Transpose(x, p0), p1)` becomes a single
/// `Transpose(x, p0∘p1)`, or — when the composed permutation is the identity
/// — a direct passthrough of `x` with both transposes removed entirely.
/// Only applies when the inner transpose's output has no other consumer;
/// otherwise removing it would delete a value something else still needs.
fn fuse_transposes(graph: &mut Graph) -> GPResult<bool> {
    for op_id in graph.operator_ids().to_vec() {
        let op = graph.operator(op_id)?.clone();
        let Some(outer_permutation) = permutation_of(&op.kind) else { continue };
        let input_id = op.inputs[0];

        let Some(producer_id) = graph.tensor(input_id)?.source() else { continue };
        let producer = graph.operator(producer_id)?.clone();
        let Some(inner_permutation) = permutation_of(&producer.kind) else { continue };

        if graph.tensor(input_id)?.targets() != [op_id] {
            continue;
        }

        let composed: Vec<usize> = outer_permutation.iter().map(|&p| inner_permutation[p]).collect();
        let grandparent_input = producer.inputs[0];
        let output_id = op.outputs[0];

        if is_identity(&composed) {
            graph.retarget_consumers(output_id, grandparent_input)?;
            graph.remove_operator(op_id)?;
            graph.remove_operator(producer_id)?;
            graph.remove_tensor(output_id)?;
            graph.remove_tensor(input_id)?;
        } else {
            graph.remove_operator(op_id)?;
            graph.remove_operator(producer_id)?;
            graph.remove_tensor(input_id)?;
            graph.add_operator_and_connect(OpKind::Transpose { permutation: composed }, vec![grandparent_input], vec![output_id])?;
        }
        return Ok(true);
    }
    Ok(false)
}

/// R2: a `Transpose` that only swaps a `MatMul` operand's last two axes, and
/// feeds nothing else, is absorbed by toggling that operand's `trans_a`/
/// `trans_b` flag and wiring the `MatMul` directly to the pre-transpose
/// tensor.
fn absorb_transpose_into_matmul(graph: &mut Graph) -> GPResult<bool> {
    for op_id in graph.operator_ids().to_vec() {
        let op = graph.operator(op_id)?.clone();
        let OpKind::MatMul { trans_a, trans_b } = op.kind else { continue };

        for (operand_index, &input_id) in op.inputs.iter().enumerate() {
            let Some(producer_id) = graph.tensor(input_id)?.source() else { continue };
            let producer = graph.operator(producer_id)?.clone();
            let Some(permutation) = permutation_of(&producer.kind) else { continue };

            if !swaps_last_two_axes(&permutation) || graph.tensor(input_id)?.targets() != [op_id] {
                continue;
            }

            let grandparent_input = producer.inputs[0];
            let mut new_inputs = op.inputs.clone();
            new_inputs[operand_index] = grandparent_input;
            let (new_trans_a, new_trans_b) = match operand_index {
                0 => (!trans_a, trans_b),
                1 => (trans_a, !trans_b),
                _ => unreachable!("MatMul has exactly 2 inputs"),
            };
            let outputs = op.outputs.clone();

            graph.remove_operator(op_id)?;
            graph.remove_operator(producer_id)?;
            graph.remove_tensor(input_id)?;
            graph.add_operator_and_connect(
                OpKind::MatMul { trans_a: new_trans_a, trans_b: new_trans_b },
                new_inputs,
                outputs,
            )?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn permutation_of(kind: &OpKind) -> Option<Vec<usize>> {
    match kind {
        OpKind::Transpose { permutation } => Some(permutation.clone()),
        _ => None,
    }
}

fn is_identity(permutation: &[usize]) -> bool {
    permutation.iter().enumerate().all(|(i, &p)| i == p)
}

/// True iff `permutation` is the identity everywhere except the last two
/// axes, which it swaps — the only shape of `Transpose` a `MatMul`'s
/// `trans_a`/`trans_b` flag can represent.
fn swaps_last_two_axes(permutation: &[usize]) -> bool {
    let rank = permutation.len();
    if rank < 2 {
        return false;
    }
    permutation[..rank - 2].iter().enumerate().all(|(i, &p)| i == p)
        && permutation[rank - 2] == rank - 1
        && permutation[rank - 1] == rank - 2
}
