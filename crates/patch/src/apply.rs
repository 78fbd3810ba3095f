use std::fmt;

use tidemark_value::{Row, Value};

use crate::path::{Segment, Selector};
use crate::{PatchOp, Path};

/// A patch op that failed to apply. The op is skipped; subsequent ops
/// continue on the unchanged value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyError {
    pub op: &'static str,
    pub path: String,
    pub detail: String,
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at `{}`: {}", self.op, self.path, self.detail)
    }
}

impl std::error::Error for ApplyError {}

/// Apply `ops` in order over `base`, returning the patched value together
/// with the errors of any ops that did not resolve. A failing op leaves the
/// value exactly as the previous op left it.
pub fn apply(base: &Value, ops: &[PatchOp]) -> (Value, Vec<ApplyError>) {
    let mut value = base.clone();
    let mut errors = Vec::new();
    for op in ops {
        if let Err(detail) = apply_op(&mut value, op) {
            errors.push(ApplyError {
                op: op.name(),
                path: op.path().to_string(),
                detail,
            });
        }
    }
    (value, errors)
}

fn apply_op(value: &mut Value, op: &PatchOp) -> Result<(), String> {
    match op {
        PatchOp::SetRow { path, row } => {
            let target = resolve_mut(value, path)?;
            *target = row_value(row);
            Ok(())
        }
        PatchOp::RemoveRow { path } => {
            let (list, index) = resolve_final_selector(value, path)?;
            list.remove(index);
            Ok(())
        }
        PatchOp::InsertRow { path, index, row } => {
            let list = resolve_list(value, path)?;
            // Out-of-range insert positions clamp to the end of the list.
            let index = (*index).min(list.len());
            list.insert(index, row_value(row));
            Ok(())
        }
        PatchOp::MoveRow { path, from, to } => {
            let list = resolve_list(value, path)?;
            if *from >= list.len() {
                return Err(format!("move source {from} out of range for list of {}", list.len()));
            }
            if *to >= list.len() {
                return Err(format!("move target {to} out of range for list of {}", list.len()));
            }
            let row = list.remove(*from);
            list.insert(*to, row);
            Ok(())
        }
        PatchOp::RemoveRowByIndex { path, index } => {
            let list = resolve_list(value, path)?;
            if *index >= list.len() {
                return Err(format!("index {index} out of range for list of {}", list.len()));
            }
            list.remove(*index);
            Ok(())
        }
    }
}

fn row_value(row: &Row) -> Value {
    Value::Object(row.0.clone())
}

/// Does a list element's `id` stringify to `id`? Ints render decimal,
/// strings are raw; other id types never match.
fn element_id_matches(element: &Value, id: &str) -> bool {
    let Some(obj) = element.as_object() else {
        return false;
    };
    match obj.get("id") {
        Some(Value::Int(n)) => n.to_string() == id,
        Some(Value::String(s)) => s == id,
        _ => false,
    }
}

fn select_position(list: &[Value], selector: &Selector) -> Result<usize, String> {
    match selector {
        Selector::Index(n) => {
            if *n < list.len() {
                Ok(*n)
            } else {
                Err(format!("index {n} out of range for list of {}", list.len()))
            }
        }
        Selector::Id(id) => list
            .iter()
            .position(|element| element_id_matches(element, id))
            .ok_or_else(|| format!("no row with id `{id}`")),
    }
}

fn step_field<'a>(value: &'a mut Value, field: &str) -> Result<&'a mut Value, String> {
    match value {
        Value::Object(map) => map
            .get_mut(field)
            .ok_or_else(|| format!("no field `{field}`")),
        other => Err(format!("expected an object at `{field}`, got {}", kind(other))),
    }
}

fn step_selector<'a>(value: &'a mut Value, selector: &Selector) -> Result<&'a mut Value, String> {
    match value {
        Value::Array(list) => {
            let position = select_position(list, selector)?;
            Ok(&mut list[position])
        }
        other => Err(format!("expected a list, got {}", kind(other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn resolve_mut<'a>(root: &'a mut Value, path: &Path) -> Result<&'a mut Value, String> {
    let mut current = root;
    for Segment { field, selectors } in &path.segments {
        current = step_field(current, field)?;
        for selector in selectors {
            current = step_selector(current, selector)?;
        }
    }
    Ok(current)
}

/// Resolve a path that must land on a row list.
fn resolve_list<'a>(root: &'a mut Value, path: &Path) -> Result<&'a mut Vec<Value>, String> {
    match resolve_mut(root, path)? {
        Value::Array(list) => Ok(list),
        other => Err(format!("expected a list, got {}", kind(other))),
    }
}

/// Resolve everything up to the path's final row selector, returning the
/// containing list and the selected position. `remove-row` paths must
/// terminate with a selector.
fn resolve_final_selector<'a>(root: &'a mut Value, path: &Path) -> Result<(&'a mut Vec<Value>, usize), String> {
    let Some((last, prefix)) = path.segments.split_last() else {
        return Err("empty path".to_owned());
    };
    let Some((final_selector, leading)) = last.selectors.split_last() else {
        return Err("path does not terminate with a row selector".to_owned());
    };

    let mut current = root;
    for Segment { field, selectors } in prefix {
        current = step_field(current, field)?;
        for selector in selectors {
            current = step_selector(current, selector)?;
        }
    }
    current = step_field(current, &last.field)?;
    for selector in leading {
        current = step_selector(current, selector)?;
    }

    match current {
        Value::Array(list) => {
            let position = select_position(list, final_selector)?;
            Ok((list, position))
        }
        other => Err(format!("expected a list, got {}", kind(other))),
    }
}
