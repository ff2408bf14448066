//! Common test utilities
#![allow(dead_code)]

use graphrt::dtype::DType;
use graphrt::graph::{Graph, GraphBuilder, OpType};
use graphrt::registry::EvaluatorRegistry;
use graphrt::subgraph::{FusedKernel, KernelArgs, KernelError};
use graphrt::tensor::{PartialShape, Tensor};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Registry with the reference evaluators
pub fn reference_registry() -> Arc<EvaluatorRegistry> {
    Arc::new(EvaluatorRegistry::with_reference_ops())
}

/// `result = op(x)` over one f32 parameter
pub fn unary_graph(op: OpType, shape: impl Into<PartialShape>) -> Arc<Graph> {
    let mut b = GraphBuilder::new();
    let x = b.parameter(DType::F32, shape);
    let y = b.op(op, &[x]).unwrap();
    b.result(y).unwrap();
    Arc::new(b.build().unwrap())
}

/// `result = op(x, y)` over two f32 parameters
pub fn binary_graph(
    op: OpType,
    lhs: impl Into<PartialShape>,
    rhs: impl Into<PartialShape>,
) -> Arc<Graph> {
    let mut b = GraphBuilder::new();
    let x = b.parameter(DType::F32, lhs);
    let y = b.parameter(DType::F32, rhs);
    let z = b.op(op, &[x, y]).unwrap();
    b.result(z).unwrap();
    Arc::new(b.build().unwrap())
}

/// f32 tensor filled with `0.5 * i - offset`
pub fn ramp(shape: &[usize], offset: f32) -> Tensor {
    let n: usize = shape.iter().product();
    let data: Vec<f32> = (0..n).map(|i| 0.5 * i as f32 - offset).collect();
    Tensor::from_slice(&data, shape).unwrap()
}

/// Assert two f32 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f32(a: &[f32], b: &[f32], rtol: f32, atol: f32, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}

/// Elementwise f32 kernel for two inputs and one output
pub struct BinaryKernel {
    op: fn(f32, f32) -> f32,
}

impl BinaryKernel {
    pub fn new(op: fn(f32, f32) -> f32) -> Self {
        Self { op }
    }

    pub fn add() -> Self {
        Self::new(|a, b| a + b)
    }

    pub fn mul() -> Self {
        Self::new(|a, b| a * b)
    }
}

impl FusedKernel for BinaryKernel {
    unsafe fn call(&self, args: &KernelArgs<'_>) -> Result<(), KernelError> {
        let [rows, cols] = args.tile_extents;
        let s = args.tile_strides;
        for r in 0..rows as isize {
            for c in 0..cols as isize {
                let at = |port: usize| r * s[port][0] + c * s[port][1];
                let a = *(args.inputs[0].offset(at(0)) as *const f32);
                let b = *(args.inputs[1].offset(at(1)) as *const f32);
                *(args.outputs[0].offset(at(2)) as *mut f32) = (self.op)(a, b);
            }
        }
        Ok(())
    }
}

/// One recorded kernel invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub outer_index: Vec<usize>,
    pub tile_extents: [usize; 2],
    pub scratchpad: (usize, usize),
}

/// Kernel that records its invocations and touches no buffers
///
/// Fails with a `KernelError` on the call numbered `fail_at`, if set.
#[derive(Default)]
pub struct RecordingKernel {
    pub scratch: usize,
    pub fail_at: Option<usize>,
    calls: AtomicUsize,
    log: Mutex<Vec<Invocation>>,
}

impl RecordingKernel {
    pub fn with_scratch(scratch: usize) -> Self {
        Self {
            scratch,
            ..Self::default()
        }
    }

    pub fn failing_at(call: usize) -> Self {
        Self {
            fail_at: Some(call),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.log.lock().clone()
    }

    /// Outer indices in sorted order
    pub fn sorted_indices(&self) -> Vec<Vec<usize>> {
        let mut indices: Vec<_> = self.log.lock().iter().map(|i| i.outer_index.clone()).collect();
        indices.sort();
        indices
    }
}

impl FusedKernel for RecordingKernel {
    fn scratchpad_size(&self) -> usize {
        self.scratch
    }

    unsafe fn call(&self, args: &KernelArgs<'_>) -> Result<(), KernelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if Some(call) == self.fail_at {
            return Err(KernelError::new(format!("injected failure at call {call}")));
        }
        if args.scratchpad_len > 0 {
            std::ptr::write_bytes(args.scratchpad, 0xAB, args.scratchpad_len);
        }
        self.log.lock().push(Invocation {
            outer_index: args.outer_index.to_vec(),
            tile_extents: args.tile_extents,
            scratchpad: (args.scratchpad as usize, args.scratchpad_len),
        });
        Ok(())
    }
}

/// Every index of `extents` in row-major order
pub fn all_indices(extents: &[usize]) -> Vec<Vec<usize>> {
    let total: usize = extents.iter().product();
    (0..total)
        .map(|flat| {
            let mut rest = flat;
            let mut index = vec![0; extents.len()];
            for (i, &e) in index.iter_mut().zip(extents).rev() {
                *i = rest % e;
                rest /= e;
            }
            index
        })
        .collect()
}
