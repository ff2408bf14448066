//! Integration tests for fused subgraph nodes inside an interpreted graph
//!
//! Tests verify:
//! - Compiled and interpreted paths produce identical outputs
//! - Output shapes follow input broadcasting across calls
//! - Kernel failures surface through the outer executor
//! - The interpreted body shares the caller's variable state

mod common;

use common::{BinaryKernel, RecordingKernel, binary_graph, ramp, reference_registry};
use graphrt::config::RuntimeConfig;
use graphrt::dtype::DType;
use graphrt::error::Error;
use graphrt::executor::Executor;
use graphrt::graph::{Graph, GraphBuilder, NodeSpec, OpType, TensorDesc, VariableId};
use graphrt::subgraph::{FusedKernel, FusedSubgraph, SubgraphScheduler};
use graphrt::tensor::{Dim, PartialShape, Tensor};
use std::sync::Arc;

fn scheduler(threads: usize) -> Arc<SubgraphScheduler> {
    Arc::new(SubgraphScheduler::new(RuntimeConfig::default().with_num_threads(threads)).unwrap())
}

/// Outer graph: `relu(fused(x, y))`
fn outer_graph(fused: &Arc<FusedSubgraph>, lhs: PartialShape, rhs: PartialShape) -> Arc<Graph> {
    let mut b = GraphBuilder::new();
    let x = b.parameter(DType::F32, lhs);
    let y = b.parameter(DType::F32, rhs);
    let z = b.add(fused.node_spec(&[x, y]).unwrap().name("fused0")).unwrap();
    let r = b.op(OpType::RELU, &[z[0]]).unwrap();
    b.result(r).unwrap();
    Arc::new(b.build().unwrap())
}

fn fused(body: Arc<Graph>, kernel: Option<Arc<dyn FusedKernel>>, threads: usize) -> Arc<FusedSubgraph> {
    let op = FusedSubgraph::new(body, reference_registry(), scheduler(threads));
    Arc::new(match kernel {
        Some(kernel) => op.with_kernel(kernel),
        None => op,
    })
}

fn run(exec: &Executor, lhs: &Tensor, rhs: &Tensor) -> Tensor {
    let mut out = vec![Tensor::default()];
    assert!(exec
        .execute(&mut out, &[lhs.clone(), rhs.clone()], false)
        .unwrap()
        .is_completed());
    out.remove(0)
}

#[test]
fn test_kernel_matches_interpreted_body() {
    let body = || binary_graph(OpType::SUBTRACT, [4, 1, 5], [3, 5]);
    let lhs = ramp(&[4, 1, 5], 3.0);
    let rhs = ramp(&[3, 5], 2.0);

    let interpreted = fused(body(), None, 1);
    assert!(!interpreted.available());
    let exec = Executor::new(
        outer_graph(&interpreted, [4, 1, 5].into(), [3, 5].into()),
        reference_registry(),
    );
    let expected = run(&exec, &lhs, &rhs);
    assert_eq!(expected.shape(), Some(&[4, 3, 5][..]));

    for threads in [1, 2, 8] {
        let compiled = fused(body(), Some(Arc::new(BinaryKernel::new(|a, b| a - b))), threads);
        assert!(compiled.available());
        let exec = Executor::new(
            outer_graph(&compiled, [4, 1, 5].into(), [3, 5].into()),
            reference_registry(),
        );
        let out = run(&exec, &lhs, &rhs);
        assert_eq!(out.shape(), expected.shape());
        assert_eq!(&*out.bytes(), &*expected.bytes(), "threads={threads}");
    }
}

#[test]
fn test_dynamic_shapes_across_calls() {
    let body = binary_graph(OpType::ADD, [Dim::Dynamic, Dim::Static(3)], [3]);
    let op = fused(body, Some(Arc::new(BinaryKernel::add())), 4);
    let exec = Executor::new(
        outer_graph(&op, [Dim::Dynamic, Dim::Static(3)].into(), [3].into()),
        reference_registry(),
    );
    let rhs = Tensor::from_slice(&[1.0f32, -100.0, 0.5], &[3]).unwrap();

    for rows in [2, 7, 2, 300] {
        let lhs = ramp(&[rows, 3], 1.0);
        let lhs_data = lhs.to_vec::<f32>().unwrap();
        let rhs_data = rhs.to_vec::<f32>().unwrap();
        let expected: Vec<f32> = lhs_data
            .iter()
            .enumerate()
            .map(|(i, &x)| (x + rhs_data[i % 3]).max(0.0))
            .collect();

        let out = run(&exec, &lhs, &rhs);
        assert_eq!(out.shape(), Some(&[rows, 3][..]));
        assert_eq!(out.to_vec::<f32>().unwrap(), expected, "rows={rows}");
    }
}

#[test]
fn test_kernel_failure_surfaces() {
    let body = binary_graph(OpType::MULTIPLY, [2, 3], [2, 3]);
    let op = fused(body, Some(Arc::new(RecordingKernel::failing_at(0))), 1);
    let exec = Executor::new(outer_graph(&op, [2, 3].into(), [2, 3].into()), reference_registry());

    let x = ramp(&[2, 3], 0.0);
    let mut out = vec![Tensor::default()];
    let err = exec.execute(&mut out, &[x.clone(), x], false).unwrap_err();
    match err {
        Error::KernelFailed(e) => assert!(e.message().contains("injected failure")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_input_dtype_checked_before_kernel() {
    let body = binary_graph(OpType::ADD, [3], [3]);
    let op = fused(body, Some(Arc::new(RecordingKernel::default())), 1);

    let mut b = GraphBuilder::new();
    let x = b.parameter(DType::F32, [3]);
    let y = b.parameter(DType::I32, [3]);
    let z = b.add(op.node_spec(&[x, y]).unwrap()).unwrap();
    b.result(z[0]).unwrap();
    let exec = Executor::new(Arc::new(b.build().unwrap()), reference_registry());

    let x = Tensor::from_slice(&[1.0f32, 2.0, 3.0], &[3]).unwrap();
    let y = Tensor::from_slice(&[1i32, 2, 3], &[3]).unwrap();
    let mut out = vec![Tensor::default()];
    let err = exec.execute(&mut out, &[x, y], false).unwrap_err();
    assert!(matches!(
        err,
        Error::DTypeMismatch {
            expected: DType::F32,
            got: DType::I32
        }
    ));
}

#[test]
fn test_interpreted_body_shares_caller_variables() {
    let mut b = GraphBuilder::new();
    let x = b.parameter(DType::F32, [3]);
    let acc = b
        .add(
            NodeSpec::new(OpType::ACCUMULATE)
                .inputs(&[x])
                .output(TensorDesc::new(DType::F32, [3]))
                .variable(VariableId::new("total")),
        )
        .unwrap();
    b.result(acc[0]).unwrap();
    let op = Arc::new(FusedSubgraph::new(
        Arc::new(b.build().unwrap()),
        reference_registry(),
        scheduler(1),
    ));

    let mut b = GraphBuilder::new();
    let x = b.parameter(DType::F32, [3]);
    let z = b.add(op.node_spec(&[x]).unwrap()).unwrap();
    b.result(z[0]).unwrap();
    let exec = Executor::new(Arc::new(b.build().unwrap()), reference_registry());

    let x = Tensor::from_slice(&[1.0f32, 2.0, 3.0], &[3]).unwrap();
    let mut out = vec![Tensor::default()];
    exec.execute(&mut out, &[x.clone()], false).unwrap();
    exec.execute(&mut out, &[x.clone()], false).unwrap();
    assert_eq!(out[0].to_vec::<f32>().unwrap(), vec![2.0, 4.0, 6.0]);

    let total = exec.variables().snapshot(&VariableId::new("total")).unwrap();
    assert_eq!(total.to_vec::<f32>().unwrap(), vec![2.0, 4.0, 6.0]);

    exec.reset_state();
    exec.execute(&mut out, &[x], false).unwrap();
    assert_eq!(out[0].to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_static_body_shape_enforced_on_both_paths() {
    let body = || binary_graph(OpType::ADD, [2, 3], [1, 3]);
    let lhs = ramp(&[4, 3], 0.0);
    let rhs = ramp(&[1, 3], 1.0);

    for kernel in [None, Some(Arc::new(BinaryKernel::add()) as Arc<dyn FusedKernel>)] {
        let op = fused(body(), kernel, 2);
        let exec = Executor::new(
            outer_graph(&op, [Dim::Dynamic, Dim::Static(3)].into(), [1, 3].into()),
            reference_registry(),
        );
        let mut out = vec![Tensor::default()];
        let err = exec
            .execute(&mut out, &[lhs.clone(), rhs.clone()], false)
            .unwrap_err();
        match err {
            Error::ShapeMismatch { expected, got } => {
                assert_eq!(expected, [2, 3], "available={}", op.available());
                assert_eq!(got, [4, 3]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
