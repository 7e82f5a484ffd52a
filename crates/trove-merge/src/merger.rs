//! Field-level three-way merge over JSON values.

use std::collections::BTreeSet;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::MergeError;
use crate::{MergePair, MergePort};

/// Default [`MergePort`]: reconciles values field by field.
///
/// Rules, applied recursively:
/// - a scalar that differs from its base overwrites the accumulated value;
/// - an object merges key by key, and keys the candidate dropped relative
///   to its base are dropped;
/// - an array is treated as an ordered multiset: values the candidate
///   dropped are removed, values it added are inserted at their position;
/// - a missing candidate deletes whatever its base had.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreeWayMerger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

fn shape(value: &Value) -> Shape {
    match value {
        Value::Null => Shape::Null,
        Value::Bool(_) => Shape::Bool,
        Value::Number(_) => Shape::Number,
        Value::String(_) => Shape::String,
        Value::Array(_) => Shape::Array,
        Value::Object(_) => Shape::Object,
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

impl ThreeWayMerger {
    pub fn new() -> Self {
        Self
    }

    /// Fold `(base, candidate)` pairs into one value, in order.
    pub fn merge_values(&self, pairs: Vec<MergePair<Value>>) -> Option<Value> {
        let mut ret = None;
        for pair in pairs {
            ret = merge_apply(pair.base.as_ref(), pair.candidate.as_ref(), ret);
        }
        ret
    }

    /// Classic three-way merge of two edits of a common ancestor.
    ///
    /// Scalar conflicts favour `right`.
    pub fn merge_three_way(
        &self,
        common: Option<&Value>,
        left: Option<&Value>,
        right: Option<&Value>,
    ) -> Option<Value> {
        three_way(common, left, right)
    }
}

impl<T> MergePort<T> for ThreeWayMerger
where
    T: Serialize + DeserializeOwned,
{
    fn merge(&self, pairs: Vec<MergePair<T>>) -> Result<Option<T>, MergeError> {
        let mut values = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let base = pair.base.as_ref().map(serde_json::to_value).transpose()?;
            let candidate = pair
                .candidate
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?;
            values.push(MergePair::new(base, candidate));
        }

        let count = values.len();
        let merged = self.merge_values(values);
        trace!(pairs = count, merged = merged.is_some(), "merged leaves");

        Ok(merged.map(serde_json::from_value).transpose()?)
    }
}

// -----------------------------------------------------------------------
// Apply: replay one candidate's edits (relative to its base) onto `ret`
// -----------------------------------------------------------------------

fn merge_apply(base: Option<&Value>, what: Option<&Value>, ret: Option<Value>) -> Option<Value> {
    let Some(what) = what else {
        // Deleted candidate: wipes the value only if it had one to delete.
        return if base.is_none() { ret } else { None };
    };

    let base = base.filter(|b| shape(b) == shape(what));
    let Some(ret) = ret.filter(|r| shape(r) == shape(what)) else {
        return Some(what.clone());
    };

    match (what, ret) {
        (Value::Object(what_map), Value::Object(mut out)) => {
            merge_map_apply(&mut out, base.and_then(Value::as_object), what_map);
            Some(Value::Object(out))
        }
        (Value::Array(what_list), Value::Array(mut out)) => {
            merge_list_apply(&mut out, base.and_then(Value::as_array), what_list);
            Some(Value::Array(out))
        }
        (scalar, ret) => {
            if base == Some(scalar) {
                Some(ret)
            } else {
                Some(scalar.clone())
            }
        }
    }
}

fn merge_map_apply(ret: &mut Map<String, Value>, base: Option<&Map<String, Value>>, what: &Map<String, Value>) {
    if let Some(base) = base {
        for key in base.keys() {
            if !what.contains_key(key) {
                ret.remove(key);
            }
        }
    }

    for (key, val_what) in what {
        let val_base = base.and_then(|b| b.get(key));
        let val_ret = ret.remove(key).or_else(|| Some(val_what.clone()));
        if let Some(merged) = merge_apply(val_base, Some(val_what), val_ret) {
            ret.insert(key.clone(), merged);
        }
    }
}

fn merge_list_apply(ret: &mut Vec<Value>, base: Option<&Vec<Value>>, what: &[Value]) {
    match base {
        None => {
            let mut existing = ret.clone();
            for (n, val) in what.iter().enumerate() {
                if !remove_first(&mut existing, val) {
                    insert_positional(ret, n, what.len(), val.clone());
                }
            }
        }
        Some(base) => {
            let mut remaining_what = what.to_vec();
            for val in base {
                if !remove_first(&mut remaining_what, val) {
                    remove_first(ret, val);
                }
            }

            let mut remaining_base = base.clone();
            for (n, val) in what.iter().enumerate() {
                if !remove_first(&mut remaining_base, val) {
                    insert_positional(ret, n, what.len(), val.clone());
                }
            }
        }
    }
}

// -----------------------------------------------------------------------
// Three-way: common ancestor plus two independent edits
// -----------------------------------------------------------------------

fn three_way(common: Option<&Value>, left: Option<&Value>, right: Option<&Value>) -> Option<Value> {
    // A changed shape replaces the value outright, right first.
    if let (Some(c), Some(r)) = (common, right)
        && shape(c) != shape(r)
    {
        return Some(r.clone());
    }
    if let (Some(c), Some(l)) = (common, left)
        && shape(c) != shape(l)
    {
        return Some(l.clone());
    }

    let sample = common.or(right).or(left)?;

    if !is_container(sample) {
        return if common != right {
            right.cloned()
        } else if common != left {
            left.cloned()
        } else {
            common.cloned()
        };
    }

    if common.is_some() && (right.is_none() || left.is_none()) {
        return None;
    }

    match sample {
        Value::Object(_) => Some(Value::Object(merge_map_three_way(
            common.and_then(Value::as_object),
            left.and_then(Value::as_object),
            right.and_then(Value::as_object),
        ))),
        _ => Some(Value::Array(merge_list_three_way(
            common.and_then(Value::as_array),
            left.and_then(Value::as_array),
            right.and_then(Value::as_array),
        ))),
    }
}

fn merge_map_three_way(
    common: Option<&Map<String, Value>>,
    left: Option<&Map<String, Value>>,
    right: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let keys: BTreeSet<&String> = [common, left, right]
        .into_iter()
        .flatten()
        .flat_map(|map| map.keys())
        .collect();

    let mut out = Map::new();
    for key in keys {
        let merged = three_way(
            common.and_then(|m| m.get(key)),
            left.and_then(|m| m.get(key)),
            right.and_then(|m| m.get(key)),
        );
        if let Some(value) = merged {
            out.insert(key.clone(), value);
        }
    }
    out
}

fn merge_list_three_way(
    common: Option<&Vec<Value>>,
    left: Option<&Vec<Value>>,
    right: Option<&Vec<Value>>,
) -> Vec<Value> {
    let in_common = |v: &Value| common.is_some_and(|c| c.contains(v));
    let in_left = |v: &Value| left.is_some_and(|l| l.contains(v));
    let in_right = |v: &Value| right.is_some_and(|r| r.contains(v));

    let mut ret: Vec<Value> = common.cloned().unwrap_or_default();

    if let Some(left) = left {
        for (n, val) in left.iter().enumerate() {
            if !in_common(val) {
                insert_positional(&mut ret, n, left.len(), val.clone());
            }
        }
    }
    if let Some(common) = common {
        for val in common {
            if !in_left(val) {
                remove_first(&mut ret, val);
            }
        }
    }

    if let Some(right) = right {
        for (n, val) in right.iter().enumerate() {
            if !in_common(val) && !in_left(val) {
                insert_positional(&mut ret, n, right.len(), val.clone());
            }
        }
    }
    if let Some(common) = common {
        for val in common {
            if !in_right(val) {
                remove_first(&mut ret, val);
            }
        }
    }

    ret
}

// -----------------------------------------------------------------------
// List helpers
// -----------------------------------------------------------------------

fn remove_first(list: &mut Vec<Value>, val: &Value) -> bool {
    match list.iter().position(|v| v == val) {
        Some(idx) => {
            list.remove(idx);
            true
        }
        None => false,
    }
}

/// Insert `val`, found at index `n` of a list of length `len`, keeping
/// first and last elements anchored to the ends.
fn insert_positional(ret: &mut Vec<Value>, n: usize, len: usize, val: Value) {
    if n + 1 == len {
        ret.push(val);
    } else if n == 0 {
        ret.insert(0, val);
    } else if n < ret.len() {
        ret.insert(n, val);
    } else {
        ret.push(val);
    }
}
