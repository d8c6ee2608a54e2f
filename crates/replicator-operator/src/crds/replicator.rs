use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[kube(
    group = "replicator.operator.dev",
    version = "v1alpha1",
    kind = "Replicator",
    plural = "replicators",
    namespaced,
    status = "ReplicatorStatus",
    shortname = "repl"
)]
pub struct ReplicatorSpec {
    /// Resource to replicate from
    #[serde(default)]
    pub from: ResourceQuery,
    /// Resource to replicate to
    #[serde(default)]
    pub to: ResourceQuery,
}

/// Reference to one addressable cluster object. Empty fields are unset and
/// filled in by the controller: apiVersion defaults to "v1", the destination
/// kind/name default to the source's, namespace defaults to the Replicator's.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuery {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct ReplicatorStatus {
    /// Outcome of the last reconcile
    pub message: Option<String>,
    #[serde(default)]
    pub phase: ReplicatorPhase,
    /// True once the destination matches the source
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
pub enum ReplicatorPhase {
    #[default]
    Pending,
    Succeeded,
    Failed,
    Unknown,
}
