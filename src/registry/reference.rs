//! Reference evaluators
//!
//! Small, dtype-generic implementations that let graphs run end to end. All
//! math goes through `Element::to_f64`/`from_f64`, so results are identical
//! for every kernel that follows the same convention.

use super::EvaluatorRegistry;
use crate::dispatch_dtype;
use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::executor::{EvalContext, VariableContext};
use crate::graph::{Node, OpType};
use crate::tensor::{broadcast_shapes, Tensor};
use parking_lot::Mutex;
use std::sync::Arc;

pub(super) fn register_all(registry: &mut EvaluatorRegistry) {
    registry
        .register_fn(OpType::RELU, relu)
        .register_fn(OpType::ADD, |n, o, i, _| binary(n, o, i, |a, b| a + b))
        .register_fn(OpType::SUBTRACT, |n, o, i, _| binary(n, o, i, |a, b| a - b))
        .register_fn(OpType::MULTIPLY, |n, o, i, _| binary(n, o, i, |a, b| a * b))
        .register_fn(OpType::ACCUMULATE, accumulate)
        .register_fn(OpType::READ_VALUE, read_value)
        .register_fn(OpType::ASSIGN, assign);
}

fn relu(node: &Node, outputs: &mut [Tensor], inputs: &[Tensor], _ctx: &EvalContext) -> Result<()> {
    let [input] = operands::<1>(node, inputs)?;
    let shape = input.resolved_shape()?.to_vec();
    let out = single_output(node, outputs, input)?;
    out.resize(&shape);

    dispatch_dtype!(input.dtype(), T => {
        let values: Vec<T> = typed::<T>(input)
            .iter()
            .map(|&x| T::from_f64(x.to_f64().max(0.0)))
            .collect();
        store(out, &values);
        Ok(())
    }, "Relu")
}

/// Elementwise binary operator with numpy broadcasting
pub(crate) fn binary(
    node: &Node,
    outputs: &mut [Tensor],
    inputs: &[Tensor],
    op: fn(f64, f64) -> f64,
) -> Result<()> {
    let [lhs, rhs] = operands::<2>(node, inputs)?;
    if lhs.dtype() != rhs.dtype() {
        return Err(Error::DTypeMismatch {
            expected: lhs.dtype(),
            got: rhs.dtype(),
        });
    }
    let shape = broadcast_shapes(lhs.resolved_shape()?, rhs.resolved_shape()?)?;
    let lhs_view = crate::tensor::Layout::contiguous(lhs.resolved_shape()?).broadcast_to(&shape)?;
    let rhs_view = crate::tensor::Layout::contiguous(rhs.resolved_shape()?).broadcast_to(&shape)?;
    let out = single_output(node, outputs, lhs)?;
    out.resize(&shape);

    dispatch_dtype!(lhs.dtype(), T => {
        let values: Vec<T> = {
            let a_bytes = lhs.bytes();
            let b_bytes = rhs.bytes();
            let a: &[T] = bytemuck::cast_slice(&a_bytes);
            let b: &[T] = bytemuck::cast_slice(&b_bytes);
            lhs_view
                .offsets()
                .zip(rhs_view.offsets())
                .map(|(i, j)| T::from_f64(op(a[i].to_f64(), b[j].to_f64())))
                .collect()
        };
        store(out, &values);
        Ok(())
    }, "binary")
}

/// `variable += input; output = variable`
fn accumulate(node: &Node, outputs: &mut [Tensor], inputs: &[Tensor], ctx: &EvalContext) -> Result<()> {
    let [input] = operands::<1>(node, inputs)?;
    let shape = input.resolved_shape()?.to_vec();
    let slot = variable_slot(node, ctx, input)?;
    let mut state = slot.lock();
    if state.dtype() != input.dtype() {
        return Err(Error::DTypeMismatch {
            expected: state.dtype(),
            got: input.dtype(),
        });
    }
    if state.shape() != Some(shape.as_slice()) {
        return Err(Error::shape_mismatch(state.shape().unwrap_or(&[]), &shape));
    }

    dispatch_dtype!(input.dtype(), T => {
        let sum: Vec<T> = typed::<T>(&state)
            .iter()
            .zip(typed::<T>(input).iter())
            .map(|(&acc, &x)| T::from_f64(acc.to_f64() + x.to_f64()))
            .collect();
        let mut next = Tensor::zeros(input.dtype(), &shape);
        store(&mut next, &sum);
        *state = next;
        Ok::<(), Error>(())
    }, "Accumulate")?;

    let out = single_output(node, outputs, input)?;
    *out = state.deep_clone();
    Ok(())
}

/// `output = variable`
fn read_value(node: &Node, outputs: &mut [Tensor], inputs: &[Tensor], ctx: &EvalContext) -> Result<()> {
    let variables = attached_variables(node, ctx)?;
    let id = variable_id(node)?;
    let value = match (variables.snapshot(id), inputs.first()) {
        (Some(value), _) => value,
        // Uninitialized variable with an init operand reads the init value
        (None, Some(init)) => init.deep_clone(),
        (None, None) => {
            return Err(Error::evaluation(
                node.op_type().as_str(),
                format!("variable {id:?} has no value"),
            ))
        }
    };
    let out = outputs.first_mut().ok_or_else(|| arity_error(node, "one output"))?;
    *out = value;
    Ok(())
}

/// `variable = input; output = input`
fn assign(node: &Node, outputs: &mut [Tensor], inputs: &[Tensor], ctx: &EvalContext) -> Result<()> {
    let [input] = operands::<1>(node, inputs)?;
    let variables = attached_variables(node, ctx)?;
    variables.set(variable_id(node)?, input.deep_clone());
    let out = single_output(node, outputs, input)?;
    *out = input.deep_clone();
    Ok(())
}

fn operands<'a, const N: usize>(node: &Node, inputs: &'a [Tensor]) -> Result<[&'a Tensor; N]> {
    if inputs.len() != N {
        return Err(arity_error(node, &format!("{N} inputs, got {}", inputs.len())));
    }
    Ok(std::array::from_fn(|i| &inputs[i]))
}

fn single_output<'a>(node: &Node, outputs: &'a mut [Tensor], like: &Tensor) -> Result<&'a mut Tensor> {
    if outputs.len() != 1 {
        return Err(arity_error(node, &format!("one output, got {}", outputs.len())));
    }
    let out = &mut outputs[0];
    if out.dtype() != like.dtype() {
        return Err(Error::DTypeMismatch {
            expected: out.dtype(),
            got: like.dtype(),
        });
    }
    Ok(out)
}

fn arity_error(node: &Node, expected: &str) -> Error {
    Error::evaluation(node.op_type().as_str(), format!("expected {expected}"))
}

fn variable_id(node: &Node) -> Result<&crate::graph::VariableId> {
    node.variable()
        .ok_or_else(|| Error::evaluation(node.op_type().as_str(), "node has no variable"))
}

fn attached_variables<'a>(node: &Node, ctx: &'a EvalContext) -> Result<&'a Arc<VariableContext>> {
    ctx.variables()
        .ok_or_else(|| Error::evaluation(node.op_type().as_str(), "no variable context attached"))
}

fn variable_slot(node: &Node, ctx: &EvalContext, like: &Tensor) -> Result<Arc<Mutex<Tensor>>> {
    let variables = attached_variables(node, ctx)?;
    let id = variable_id(node)?;
    let shape = like.resolved_shape()?;
    Ok(variables.get_or_init(id, || Tensor::zeros(like.dtype(), shape)))
}

fn typed<T: Element>(tensor: &Tensor) -> Vec<T> {
    let bytes = tensor.bytes();
    bytemuck::cast_slice::<u8, T>(&bytes).to_vec()
}

fn store<T: Element>(out: &mut Tensor, values: &[T]) {
    out.bytes_mut().copy_from_slice(bytemuck::cast_slice(values));
}
