use kube::{
    Api,
    api::{DynamicObject, PostParams},
};
use serde_json::Value;

use crate::{error::ReconcileError, plan::SyncAction};

/// What actually happened, for status phrasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

/// Execute a planned action against the destination API. Create collisions
/// and version conflicts come back as `Conflict` so the driver retries and
/// replans from fresh state; schema rejections are terminal.
pub async fn apply(
    api: &Api<DynamicObject>,
    name: &str,
    action: &SyncAction,
    desired: &Value,
) -> Result<Applied, ReconcileError> {
    match action {
        SyncAction::NoOp => Ok(Applied::Unchanged),
        SyncAction::Create => {
            let obj: DynamicObject = serde_json::from_value(desired.clone())?;
            match api.create(&PostParams::default(), &obj).await {
                Ok(_) => Ok(Applied::Created),
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    Err(ReconcileError::Conflict(name.to_string()))
                }
                Err(kube::Error::Api(ae)) if matches!(ae.code, 400 | 422) => {
                    Err(ReconcileError::Rejected(ae.message))
                }
                Err(e) => Err(e.into()),
            }
        }
        SyncAction::Update { resource_version } => {
            let mut desired = desired.clone();
            // Optimistic concurrency: replace only the revision we planned
            // against.
            if let Some(rv) = resource_version
                && let Some(meta) = desired
                    .pointer_mut("/metadata")
                    .and_then(Value::as_object_mut)
            {
                meta.insert("resourceVersion".into(), Value::String(rv.clone()));
            }
            let obj: DynamicObject = serde_json::from_value(desired)?;
            match api.replace(name, &PostParams::default(), &obj).await {
                Ok(_) => Ok(Applied::Updated),
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    Err(ReconcileError::Conflict(name.to_string()))
                }
                Err(kube::Error::Api(ae)) if matches!(ae.code, 400 | 422) => {
                    Err(ReconcileError::Rejected(ae.message))
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}
