use std::sync::Arc;

use graph_planner::graph::optimizer::optimize;
use graph_planner::runtime::HeapRuntime;
use graph_planner::{ElemType, Graph, OpKind, Shape};
use tracing_subscriber::fmt::format::FmtSpan;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut graph = Graph::new(Arc::new(HeapRuntime::default()));

    let a = graph.add_tensor(Shape::new(vec![2, 3]), ElemType::F32)?;
    let b = graph.add_tensor(Shape::new(vec![4, 3]), ElemType::F32)?;
    let bt = graph.add_tensor(Shape::new(vec![3, 4]), ElemType::F32)?;
    let c = graph.add_tensor(Shape::new(vec![2, 4]), ElemType::F32)?;

    graph.add_operator_and_connect(OpKind::Transpose { permutation: vec![1, 0] }, vec![b], vec![bt])?;
    graph.add_operator_and_connect(OpKind::MatMul { trans_a: false, trans_b: false }, vec![a, bt], vec![c])?;

    println!("before optimize: {} operators", graph.operator_ids().len());
    optimize(&mut graph)?;
    println!("after optimize: {} operators (Transpose absorbed into MatMul)", graph.operator_ids().len());

    graph.shape_infer()?;
    graph.data_malloc()?;
    println!("peak workspace bytes: {}", graph.allocator().peak());

    Ok(())
}
