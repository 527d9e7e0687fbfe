//! # Named Operation Invocation
//!
//! Runs a platform operation from its name and a JSON argument object.
//! This is what `POST /_ops/{name}` calls, so out-of-process tests can drive
//! the mock the same way in-process tests call [`Platform`] methods.
//!
//! Historical names are rejected before any argument is looked at.

use crate::platform::Platform;
use minihull_core::{Ident, MinihullError, Operation, Record, resolve_operation};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallArgs {
    url: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateEntityArgs {
    ident: Ident,
    #[serde(alias = "traits")]
    patch: Record,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MembershipArgs {
    ident: Ident,
    group_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateSubscriberArgs {
    #[serde(default)]
    id: Option<String>,
    settings: Record,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RenameGroupArgs {
    id: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NotifyArgs {
    topic: String,
    message: Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReportArgs {
    ident: Ident,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct SubscriberArgs {
    id: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CallSubscriberArgs {
    path: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    body: Option<Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotArgs {
    name: String,
}

/// Decode the argument object. `null` is treated as `{}`.
fn args<T: DeserializeOwned>(operation: Operation, value: Value) -> Result<T, MinihullError> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value)
        .map_err(|e| MinihullError::InvalidArguments(format!("{}: {}", operation, e)))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, MinihullError> {
    serde_json::to_value(value).map_err(|e| MinihullError::SerializationError(e.to_string()))
}

/// Run the operation called `name` with `arguments`.
pub async fn invoke(
    platform: &Platform,
    name: &str,
    arguments: Value,
) -> Result<Value, MinihullError> {
    let operation = resolve_operation(name).inspect_err(|e| {
        if matches!(e, MinihullError::RemovedOperation { .. }) {
            tracing::error!(operation = name, "{}", e);
        }
    })?;
    tracing::debug!(%operation, "Invoking operation");

    match operation {
        Operation::Install => {
            let a: InstallArgs = args(operation, arguments)?;
            let (subscriber, dispatch) = platform.install(&a.url).await?;
            Ok(json!({ "subscriber": subscriber, "dispatch": to_value(&dispatch)? }))
        }
        Operation::UpdateEntity => {
            let a: UpdateEntityArgs = args(operation, arguments)?;
            let (report, dispatch) = platform.update_entity(&a.ident, &a.patch).await?;
            Ok(json!({ "report": to_value(&report)?, "dispatch": to_value(&dispatch)? }))
        }
        Operation::EnterGroup | Operation::ExitGroup => {
            let a: MembershipArgs = args(operation, arguments)?;
            let (report, dispatch) = if operation == Operation::EnterGroup {
                platform.enter_group(&a.ident, &a.group_id).await?
            } else {
                platform.exit_group(&a.ident, &a.group_id).await?
            };
            Ok(json!({ "report": to_value(&report)?, "dispatch": to_value(&dispatch)? }))
        }
        Operation::UpdateSubscriber => {
            let a: UpdateSubscriberArgs = args(operation, arguments)?;
            let (subscriber, dispatch) = platform
                .update_subscriber(a.id.as_deref(), &a.settings)
                .await?;
            Ok(json!({ "subscriber": subscriber, "dispatch": to_value(&dispatch)? }))
        }
        Operation::RenameGroup => {
            let a: RenameGroupArgs = args(operation, arguments)?;
            let (group, dispatch) = platform.rename_group(&a.id, &a.name).await?;
            Ok(json!({ "group": group, "dispatch": to_value(&dispatch)? }))
        }
        Operation::Notify => {
            let a: NotifyArgs = args(operation, arguments)?;
            let dispatch = platform.notify(&a.topic, &a.message).await;
            Ok(json!({ "dispatch": to_value(&dispatch)? }))
        }
        Operation::Report => {
            let a: ReportArgs = args(operation, arguments)?;
            to_value(&platform.report(&a.ident).await?)
        }
        Operation::Batch => {
            let a: SubscriberArgs = args(operation, arguments)?;
            to_value(&platform.batch(a.id.as_deref()).await?)
        }
        Operation::CallSubscriber => {
            let a: CallSubscriberArgs = args(operation, arguments)?;
            to_value(
                &platform
                    .call_subscriber(&a.path, a.id.as_deref(), a.body)
                    .await?,
            )
        }
        Operation::Dashboard => {
            let a: SubscriberArgs = args(operation, arguments)?;
            let url = platform.dashboard_url(a.id.as_deref()).await?;
            Ok(json!({ "url": url }))
        }
        Operation::Reset => {
            platform.reset().await;
            Ok(json!({ "reset": true }))
        }
        Operation::Save => {
            let a: SnapshotArgs = args(operation, arguments)?;
            let path = platform.save(&a.name).await?;
            Ok(json!({ "name": a.name, "path": path.to_string_lossy() }))
        }
        Operation::Load => {
            let a: SnapshotArgs = args(operation, arguments)?;
            platform.load(&a.name).await?;
            Ok(json!({ "name": a.name }))
        }
    }
}
