//! Pure diff/plan logic. Everything here is a function of its inputs so the
//! idempotence and determinism guarantees can be tested without a cluster.

use serde_json::{Map, Value};

use crate::resolve::ResourceHandle;

/// Metadata keys the user authors; the rest of metadata is server
/// bookkeeping (resourceVersion, uid, managedFields, ...) and must not be
/// replicated or diffed.
const REPLICABLE_METADATA: &[&str] = &["labels", "annotations"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Destination absent
    Create,
    /// Destination exists but its payload differs
    Update { resource_version: Option<String> },
    NoOp,
}

/// The replicable subset of an object: every user-authored field, minus
/// status and server-managed metadata. Labels and annotations survive.
pub fn replicable_payload(obj: &Value) -> Value {
    let mut out = Map::new();
    if let Some(fields) = obj.as_object() {
        for (key, value) in fields {
            match key.as_str() {
                "apiVersion" | "kind" | "status" => {}
                "metadata" => {
                    let mut meta = Map::new();
                    if let Some(m) = value.as_object() {
                        for k in REPLICABLE_METADATA {
                            if let Some(v) = m.get(*k) {
                                meta.insert((*k).to_string(), v.clone());
                            }
                        }
                    }
                    out.insert(key.clone(), Value::Object(meta));
                }
                _ => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Value::Object(out)
}

/// The source payload re-addressed to the destination coordinates.
pub fn desired_object(from: &Value, to: &ResourceHandle) -> Value {
    let mut obj = match replicable_payload(from) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    obj.insert(
        "apiVersion".into(),
        Value::String(to.resource.api_version.clone()),
    );
    obj.insert("kind".into(), Value::String(to.resource.kind.clone()));

    let meta = obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(m) = meta.as_object_mut() {
        m.insert("name".into(), Value::String(to.name.clone()));
        match &to.namespace {
            Some(ns) => {
                m.insert("namespace".into(), Value::String(ns.clone()));
            }
            None => {
                m.remove("namespace");
            }
        }
    }
    Value::Object(obj)
}

/// Decide the minimal mutation. Absent destination is always a Create; a
/// present destination whose object already contains the desired payload is
/// a NoOp, so server-side defaulting never causes spurious updates.
pub fn plan(desired: &Value, current: Option<&Value>) -> SyncAction {
    match current {
        None => SyncAction::Create,
        Some(cur) if is_subset(desired, cur) => SyncAction::NoOp,
        Some(cur) => SyncAction::Update {
            resource_version: cur
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
    }
}

/// Structural subset: every field of `desired` must be present and equal in
/// `current`; objects recurse, everything else compares by equality.
fn is_subset(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Object(d), Value::Object(c)) => d
            .iter()
            .all(|(k, dv)| c.get(k).is_some_and(|cv| is_subset(dv, cv))),
        _ => desired == current,
    }
}
