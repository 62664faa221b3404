use std::collections::HashMap;

use crate::convert::{Call, Converter};
use crate::error::UsageError;
use crate::interp::{ArgBinding, BoundTree, Failure, KwargBinding};
use crate::model::Value;
use crate::program::Program;

/// Evaluate a bound invocation tree bottom-up, calling each converter with
/// its materialized arguments and finally the root callable itself.
pub(crate) fn evaluate(program: &Program, tree: &BoundTree) -> Result<Value, Failure> {
    eval_node(program, tree, tree.root, true)
}

fn eval_node(
    program: &Program,
    tree: &BoundTree,
    id: usize,
    is_root: bool,
) -> Result<Value, Failure> {
    let invocation = &tree.arena[id];
    let info = &program.nodes[invocation.node];

    let mut args = Vec::with_capacity(invocation.args.len());
    for binding in &invocation.args {
        args.push(eval_arg(program, tree, binding)?);
    }

    let mut kwargs = HashMap::default();
    for kwarg in &info.kwargs {
        let value = match invocation.kwargs.get(&kwarg.name) {
            None => kwarg.default.clone(),
            Some(KwargBinding::Toggled(state)) => Value::Bool(*state),
            Some(KwargBinding::Arg(binding)) => eval_arg(program, tree, binding)?,
            Some(KwargBinding::Multi(rows)) => {
                let spec = kwarg
                    .multi
                    .as_ref()
                    .unwrap_or_else(|| unreachable!("internal error - multi rows without a spec"));
                let mut state = spec.instantiate(&kwarg.default);

                for (index, row) in rows {
                    let mut opargs = Vec::with_capacity(row.len());
                    for binding in row {
                        opargs.push(eval_arg(program, tree, binding)?);
                    }
                    state.option(opargs).map_err(|error| Failure::Usage {
                        index: *index,
                        error,
                    })?;
                }

                state.render()
            }
        };
        kwargs.insert(kwarg.name.clone(), value);
    }

    match &info.callable {
        Converter::Callable(callable) => {
            (callable.run)(Call { args, kwargs }).map_err(|error| {
                if is_root {
                    Failure::Command(error)
                } else {
                    Failure::Usage {
                        index: first_index(tree, invocation),
                        error: UsageError::Converter {
                            converter: info.name.clone(),
                            message: error.message,
                        },
                    }
                }
            })
        }
        _ => unreachable!("internal error - invocation frames belong to callables"),
    }
}

fn eval_arg(program: &Program, tree: &BoundTree, binding: &ArgBinding) -> Result<Value, Failure> {
    match binding {
        ArgBinding::Raw {
            primitive,
            index,
            text,
        } => primitive.parse(text).map_err(|_| Failure::Usage {
            index: *index,
            error: UsageError::InvalidValue {
                token: text.clone(),
                target: primitive.type_name().to_string(),
            },
        }),
        ArgBinding::Node(id) => eval_node(program, tree, *id, false),
        ArgBinding::Absent(value) => Ok(value.clone()),
    }
}

// The caret for a failed converter lands on its first bound token.
fn first_index(tree: &BoundTree, invocation: &crate::interp::InvocationNode) -> usize {
    for binding in &invocation.args {
        match binding {
            ArgBinding::Raw { index, .. } => return *index,
            ArgBinding::Node(id) => return first_index(tree, &tree.arena[*id]),
            ArgBinding::Absent(_) => continue,
        }
    }

    0
}
