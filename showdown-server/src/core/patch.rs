//! Structural patches over a JSON tree.
//!
//! Paths are slash-delimited, with `~1` and `~0` standing for a literal `/`
//! and `~`. Both `""` and `"/"` address the whole tree. Sequences accept a
//! non-negative index or `-` (one past the end) as their final segment.
//! The engine knows nothing about the show schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::PatchError;

/// A single patch operation, in wire form `{op, path, value?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Remove { path } => path,
        }
    }
}

/// Apply `ops` in order to a copy of `tree`.
///
/// Either every operation succeeds and the patched copy is returned, or the
/// first failure is returned and `tree` is untouched.
pub fn apply(tree: &Value, ops: &[PatchOperation]) -> Result<Value, PatchError> {
    let mut draft = tree.clone();
    for op in ops {
        apply_one(&mut draft, op)?;
    }
    Ok(draft)
}

fn apply_one(tree: &mut Value, op: &PatchOperation) -> Result<(), PatchError> {
    let path = op.path();
    let segments = parse_path(path)?;

    let Some((last, parents)) = segments.split_last() else {
        return match op {
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                *tree = value.clone();
                Ok(())
            }
            PatchOperation::Remove { .. } => Err(PatchError::CannotRemoveRoot),
        };
    };

    let parent = walk(tree, parents, path)?;
    match (parent, op) {
        (Value::Object(map), PatchOperation::Add { value, .. }) => {
            map.insert(last.clone(), value.clone());
        }
        (Value::Object(map), PatchOperation::Replace { value, .. }) => {
            let slot = map
                .get_mut(last)
                .ok_or_else(|| PatchError::MissingTarget(path.to_string()))?;
            *slot = value.clone();
        }
        (Value::Object(map), PatchOperation::Remove { .. }) => {
            map.remove(last)
                .ok_or_else(|| PatchError::MissingTarget(path.to_string()))?;
        }
        (Value::Array(items), PatchOperation::Add { value, .. }) => {
            let index = if last == "-" {
                items.len()
            } else {
                parse_index(last, path)?
            };
            if index > items.len() {
                return Err(PatchError::MissingTarget(path.to_string()));
            }
            items.insert(index, value.clone());
        }
        (Value::Array(items), PatchOperation::Replace { value, .. }) => {
            let index = parse_index(last, path)?;
            let slot = items
                .get_mut(index)
                .ok_or_else(|| PatchError::MissingTarget(path.to_string()))?;
            *slot = value.clone();
        }
        (Value::Array(items), PatchOperation::Remove { .. }) => {
            let index = parse_index(last, path)?;
            if index >= items.len() {
                return Err(PatchError::MissingTarget(path.to_string()));
            }
            items.remove(index);
        }
        _ => return Err(PatchError::NotAContainer(path.to_string())),
    }
    Ok(())
}

/// Follow `segments` from the root; every step must already exist.
fn walk<'a>(
    mut node: &'a mut Value,
    segments: &[String],
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    for segment in segments {
        node = match node {
            Value::Object(map) => map
                .get_mut(segment)
                .ok_or_else(|| PatchError::MissingTarget(path.to_string()))?,
            Value::Array(items) => {
                let index = parse_index(segment, path)?;
                items
                    .get_mut(index)
                    .ok_or_else(|| PatchError::MissingTarget(path.to_string()))?
            }
            _ => return Err(PatchError::NotAContainer(path.to_string())),
        };
    }
    Ok(node)
}

/// Split a path into decoded segments. The root yields no segments.
pub fn parse_path(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() || path == "/" {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(path.to_string()));
    };
    rest.split('/').map(decode_segment).collect()
}

fn decode_segment(raw: &str) -> Result<String, PatchError> {
    if !raw.contains('~') {
        return Ok(raw.to_string());
    }
    let mut decoded = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            decoded.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => decoded.push('~'),
            Some('1') => decoded.push('/'),
            _ => return Err(PatchError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(decoded)
}

fn parse_index(segment: &str, path: &str) -> Result<usize, PatchError> {
    let invalid = || PatchError::InvalidIndex {
        path: path.to_string(),
        segment: segment.to_string(),
    };
    // No sign, no leading zeros.
    if segment.is_empty()
        || !segment.bytes().all(|b| b.is_ascii_digit())
        || (segment.len() > 1 && segment.starts_with('0'))
    {
        return Err(invalid());
    }
    segment.parse().map_err(|_| invalid())
}
