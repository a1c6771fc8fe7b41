use std::rc::Rc;

use crate::{
    Tensor,
    pickle::{GlobalRef, Value},
    storage::TypedStorage,
    tensor::{contiguous_stride, num_elements_for_shape},
};

use super::ResolveError;

/// Replaces torch tensor-rebuild calls in `value` with materialized tensors.
///
/// Containers are rewritten in place, so memoized aliases see the result.
pub fn rebuild_tensors(value: Value) -> Result<Value, ResolveError> {
    match value {
        Value::Reduce {
            callable,
            args,
        } => {
            let args = args.into_iter().map(rebuild_tensors).collect::<Result<Vec<_>, _>>()?;
            apply(callable, args)
        },
        Value::Tuple(items) => Ok(Value::Tuple(
            items.into_iter().map(rebuild_tensors).collect::<Result<_, _>>()?,
        )),
        Value::List(list) => {
            let items: Vec<Value> = list.borrow_mut().drain(..).collect();
            let items = items.into_iter().map(rebuild_tensors).collect::<Result<Vec<_>, _>>()?;
            *list.borrow_mut() = items;
            Ok(Value::List(list))
        },
        Value::Dict(dict) => {
            let items: Vec<(Value, Value)> = dict.borrow_mut().drain(..).collect();
            let items = items
                .into_iter()
                .map(|(key, value)| Ok((rebuild_tensors(key)?, rebuild_tensors(value)?)))
                .collect::<Result<Vec<_>, ResolveError>>()?;
            *dict.borrow_mut() = items;
            Ok(Value::Dict(dict))
        },
        other => Ok(other),
    }
}

fn apply(
    callable: GlobalRef,
    mut args: Vec<Value>,
) -> Result<Value, ResolveError> {
    let module = callable.module.as_str();
    let name = callable.name.as_str();
    match (module, name) {
        ("torch._utils", "_rebuild_tensor_v2" | "_rebuild_tensor") => {
            let tensor = rebuild_tensor(&callable, &args)?;
            Ok(Value::Tensor(Rc::new(tensor)))
        },
        // Parameters carry grad flags and hooks that inference does not need.
        ("torch._utils", "_rebuild_parameter" | "_rebuild_parameter_with_state") => {
            match args.first() {
                Some(Value::Tensor(_)) => Ok(args.swap_remove(0)),
                _ => Err(malformed_call(&callable, "expected a tensor as first argument")),
            }
        },
        // Tensor subclasses: (func, new_type, args, state).
        ("torch._tensor", "_rebuild_from_type_v2") => {
            if args.len() < 3 {
                return Err(malformed_call(&callable, "expected at least 3 arguments"));
            }
            let inner_args = args.swap_remove(2);
            let func = args.swap_remove(0);
            match (func, inner_args) {
                (Value::Global(func), Value::Tuple(inner_args)) => apply(func, inner_args),
                (Value::Tensor(tensor), _) => Ok(Value::Tensor(tensor)),
                _ => Err(malformed_call(&callable, "expected a global and an argument tuple")),
            }
        },
        _ => Ok(Value::Reduce {
            callable,
            args,
        }),
    }
}

fn malformed_call(
    callable: &GlobalRef,
    reason: &str,
) -> ResolveError {
    ResolveError::MalformedTensor(format!("{callable}: {reason}"))
}

fn dims(
    callable: &GlobalRef,
    value: &Value,
    what: &str,
) -> Result<Vec<usize>, ResolveError> {
    let items = match value {
        Value::Tuple(items) => items.clone(),
        Value::List(items) => items.borrow().clone(),
        _ => return Err(malformed_call(callable, &format!("{what} must be a tuple"))),
    };
    items
        .iter()
        .map(|item| {
            item.as_int()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| malformed_call(callable, &format!("{what} must hold non-negative integers")))
        })
        .collect()
}

/// `_rebuild_tensor_v2(storage, storage_offset, size, stride, ...)`
fn rebuild_tensor(
    callable: &GlobalRef,
    args: &[Value],
) -> Result<Tensor, ResolveError> {
    let [storage, offset, size, stride, ..] = args else {
        return Err(malformed_call(callable, "expected at least 4 arguments"));
    };
    let Value::Storage(storage) = storage else {
        return Err(malformed_call(callable, &format!("expected a storage, found {}", storage.type_name())));
    };
    let offset = offset
        .as_int()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| malformed_call(callable, "storage offset must be a non-negative integer"))?;
    let shape = dims(callable, size, "size")?;
    let stride = dims(callable, stride, "stride")?;
    if shape.len() != stride.len() {
        return Err(malformed_call(
            callable,
            &format!("size has {} dims but stride has {}", shape.len(), stride.len()),
        ));
    }

    let data = gather(storage, offset, &shape, &stride)?;
    Tensor::from_bytes(storage.data_type(), &shape, data)
        .map_err(|error| ResolveError::MalformedTensor(error.to_string()))
}

fn out_of_bounds(
    storage: &TypedStorage,
    offset: usize,
    shape: &[usize],
    stride: &[usize],
) -> ResolveError {
    ResolveError::TensorOutOfBounds {
        storage: storage.index(),
        offset,
        shape: shape.to_vec(),
        stride: stride.to_vec(),
        storage_elements: storage.num_elements(),
    }
}

/// Copies the view `(offset, shape, stride)` of `storage` into contiguous
/// row-major bytes.
fn gather(
    storage: &TypedStorage,
    offset: usize,
    shape: &[usize],
    stride: &[usize],
) -> Result<Vec<u8>, ResolveError> {
    let num_elements = num_elements_for_shape(shape).ok_or_else(|| out_of_bounds(storage, offset, shape, stride))?;
    if num_elements == 0 {
        return Ok(Vec::new());
    }

    // Highest element index the view touches.
    let last = shape
        .iter()
        .zip(stride)
        .try_fold(offset, |acc, (&dim, &step)| acc.checked_add((dim - 1).checked_mul(step)?))
        .ok_or_else(|| out_of_bounds(storage, offset, shape, stride))?;
    if last >= storage.num_elements() {
        return Err(out_of_bounds(storage, offset, shape, stride));
    }

    let expected = contiguous_stride(shape);
    let is_contiguous = shape
        .iter()
        .zip(stride.iter().zip(expected.iter()))
        .all(|(&dim, (&actual, &expected))| dim == 1 || actual == expected);
    if is_contiguous {
        let bytes = storage
            .element_bytes(offset, num_elements)
            .ok_or_else(|| out_of_bounds(storage, offset, shape, stride))?;
        return Ok(bytes.to_vec());
    }

    // Broadcast strides can expand a small storage into a huge view.
    let element_size = storage.data_type().size_in_bytes();
    let size = num_elements
        .checked_mul(element_size)
        .ok_or_else(|| out_of_bounds(storage, offset, shape, stride))?;
    let mut data = Vec::new();
    data.try_reserve_exact(size).map_err(|error| {
        ResolveError::MalformedTensor(format!("view of shape {shape:?} needs {size} bytes: {error}"))
    })?;
    let mut position = vec![0usize; shape.len()];
    for _ in 0..num_elements {
        let source = offset + position.iter().zip(stride).map(|(&i, &step)| i * step).sum::<usize>();
        let bytes = storage
            .element_bytes(source, 1)
            .ok_or_else(|| out_of_bounds(storage, offset, shape, stride))?;
        data.extend_from_slice(bytes);

        for axis in (0..shape.len()).rev() {
            position[axis] += 1;
            if position[axis] < shape[axis] {
                break;
            }
            position[axis] = 0;
        }
    }
    Ok(data)
}
