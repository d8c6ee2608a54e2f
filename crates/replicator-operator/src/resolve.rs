use kube::{
    Api, Client,
    api::DynamicObject,
    core::GroupVersionKind,
    discovery::{ApiResource, Discovery, Scope},
};
use tracing::debug;

use crate::{crds::replicator::ResourceQuery, error::ReconcileError};

/// A resolved address for one cluster object: the discovered API resource,
/// its scope, and the concrete namespace/name to operate on.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub resource: ApiResource,
    pub scope: Scope,
    /// None for cluster-scoped resources
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceHandle {
    pub fn api(&self, client: Client) -> Api<DynamicObject> {
        match &self.namespace {
            Some(ns) => Api::namespaced_with(client, ns, &self.resource),
            None => Api::all_with(client, &self.resource),
        }
    }

    /// Current object state; absence is a signal, not an error.
    pub async fn fetch(&self, client: Client) -> Result<Option<DynamicObject>, ReconcileError> {
        Ok(self.api(client).get_opt(&self.name).await?)
    }

    pub fn location(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{} {}/{}", self.resource.kind, ns, self.name),
            None => format!("{} {}", self.resource.kind, self.name),
        }
    }

    /// Two handles address the same object when kind, apiVersion, namespace
    /// and name all agree.
    pub fn same_object(&self, other: &ResourceHandle) -> bool {
        self.resource.api_version == other.resource.api_version
            && self.resource.kind == other.resource.kind
            && self.namespace == other.namespace
            && self.name == other.name
    }
}

pub async fn resolve(
    client: &Client,
    query: &ResourceQuery,
    fallback_namespace: &str,
) -> Result<ResourceHandle, ReconcileError> {
    validate(query)?;
    let api_version = if query.api_version.is_empty() {
        "v1"
    } else {
        query.api_version.as_str()
    };
    let (group, version) = parse_api_version(api_version);

    let (resource, scope) = discover(client, group, version, &query.kind).await?;
    let namespace = target_namespace(&scope, &query.namespace, fallback_namespace);

    Ok(ResourceHandle {
        resource,
        scope,
        namespace,
        name: query.name.clone(),
    })
}

fn validate(query: &ResourceQuery) -> Result<(), ReconcileError> {
    if query.kind.is_empty() {
        return Err(ReconcileError::InvalidReference("kind is required".into()));
    }
    if query.name.is_empty() {
        return Err(ReconcileError::InvalidReference("name is required".into()));
    }
    Ok(())
}

fn target_namespace(scope: &Scope, query_namespace: &str, fallback: &str) -> Option<String> {
    match scope {
        Scope::Cluster => None,
        Scope::Namespaced => Some(if query_namespace.is_empty() {
            fallback.to_string()
        } else {
            query_namespace.to_string()
        }),
    }
}

/// Look the kind up via API-server discovery to get the correct plural and
/// scope. A kind missing from discovery falls back to heuristic
/// pluralization; this happens when a CRD was installed after the discovery
/// cache was built.
async fn discover(
    client: &Client,
    group: &str,
    version: &str,
    kind: &str,
) -> Result<(ApiResource, Scope), ReconcileError> {
    let discovery = Discovery::new(client.clone()).run().await?;
    for api_group in discovery.groups() {
        if api_group.name() != group {
            continue;
        }
        for (ar, caps) in api_group.recommended_resources() {
            if ar.kind == kind && ar.version == version {
                return Ok((ar, caps.scope));
            }
        }
    }

    debug!(%group, %version, %kind, "kind not in discovery, using fallback pluralization");
    let gvk = GroupVersionKind::gvk(group, version, kind);
    let ar = ApiResource::from_gvk_with_plural(&gvk, &pluralize_kind(kind));
    Ok((ar, Scope::Namespaced))
}

fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((group, version)) => (group, version),
        // Core API, e.g. "v1"
        None => ("", api_version),
    }
}

fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        // policy -> policies, but gateway -> gateways
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}
