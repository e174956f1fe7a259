//! A thin builder wrapping `&mut Graph`, for call sites that would otherwise
//! thread tensor ids through a chain of `add_tensor`/`add_operator_and_connect`
//! calls by hand.

use crate::errors::GPResult;
use crate::operator::OpKind;
use crate::types::{ElemType, Shape, TensorId};

use super::Graph;

pub struct GraphBuilder<'a> {
    graph: &'a mut Graph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(graph: &'a mut Graph) -> Self {
        Self { graph }
    }

    pub fn input(&mut self, shape: Shape, dtype: ElemType) -> GPResult<TensorId> {
        self.graph.add_tensor(shape, dtype)
    }

    pub fn matmul(&mut self, a: TensorId, b: TensorId, out_shape: Shape, dtype: ElemType, trans_a: bool, trans_b: bool) -> GPResult<TensorId> {
        let out = self.graph.add_tensor(out_shape, dtype)?;
        self.graph
            .add_operator_and_connect(OpKind::MatMul { trans_a, trans_b }, vec![a, b], vec![out])?;
        Ok(out)
    }

    pub fn transpose(&mut self, x: TensorId, permutation: Vec<usize>, out_shape: Shape, dtype: ElemType) -> GPResult<TensorId> {
        let out = self.graph.add_tensor(out_shape, dtype)?;
        self.graph
            .add_operator_and_connect(OpKind::Transpose { permutation }, vec![x], vec![out])?;
        Ok(out)
    }

    pub fn concat(&mut self, inputs: Vec<TensorId>, dim: i64, out_shape: Shape, dtype: ElemType) -> GPResult<TensorId> {
        let out = self.graph.add_tensor(out_shape, dtype)?;
        self.graph
            .add_operator_and_connect(OpKind::Concat { dim }, inputs, vec![out])?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::runtime::HeapRuntime;

    #[test]
    fn builder_wires_a_small_graph() {
        let mut graph = Graph::new(Arc::new(HeapRuntime::default()));
        let mut b = GraphBuilder::new(&mut graph);
        let x = b.input(Shape::new(vec![2, 3]), ElemType::F32).unwrap();
        let w = b.input(Shape::new(vec![3, 4]), ElemType::F32).unwrap();
        let y = b.matmul(x, w, Shape::new(vec![2, 4]), ElemType::F32, false, false).unwrap();
        assert_eq!(graph.tensor(y).unwrap().shape(), &Shape::new(vec![2, 4]));
    }
}
