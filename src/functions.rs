use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tracing::info;

use crate::error::ServiceError;
use crate::models::{AuthenticatedUser, CustomFunction, FunctionSummary, CUSTOM_FUNCTIONS};
use crate::store::{self, DocumentStore};

pub async fn save_function(
    store: &dyn DocumentStore,
    user: &AuthenticatedUser,
    name: &str,
    expression: &str,
    saved_at: DateTime<Utc>,
) -> Result<CustomFunction, ServiceError> {
    let (name, expression) = (name.trim(), expression.trim());
    if name.is_empty() || expression.is_empty() {
        return Err(ServiceError::ValidationFailed(
            "function name and expression must not be empty".to_string(),
        ));
    }

    let mut function = CustomFunction {
        id: String::new(),
        uid: user.id.clone(),
        name: name.to_string(),
        expression: expression.to_string(),
        date: saved_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    };

    let body = serde_json::to_value(&function)
        .map_err(|err| ServiceError::persistence("failed to save function")(err.into()))?;
    let id = store
        .add(CUSTOM_FUNCTIONS, body)
        .await
        .map_err(ServiceError::persistence("failed to save function"))?;
    store
        .update(CUSTOM_FUNCTIONS, &id, json!({ "id": id }))
        .await
        .map_err(ServiceError::persistence("failed to save function"))?;

    function.id = id;
    info!(function_id = %function.id, uid = %user.id, "custom function saved");
    Ok(function)
}

pub async fn functions(
    store: &dyn DocumentStore,
    user: &AuthenticatedUser,
) -> Result<Vec<FunctionSummary>, ServiceError> {
    let saved: Vec<(String, CustomFunction)> =
        store::collect_eq(store, CUSTOM_FUNCTIONS, "uid", &user.id)
            .await
            .map_err(ServiceError::persistence("failed to load functions"))?;

    Ok(saved
        .into_iter()
        .map(|(id, function)| FunctionSummary {
            id,
            name: function.name,
            expression: function.expression,
            created_at: function.date,
        })
        .collect())
}

pub async fn delete_function(
    store: &dyn DocumentStore,
    user: &AuthenticatedUser,
    function_id: &str,
) -> Result<(), ServiceError> {
    let function: CustomFunction = store::get_as(store, CUSTOM_FUNCTIONS, function_id)
        .await
        .map_err(ServiceError::persistence("failed to delete function"))?
        .ok_or_else(|| ServiceError::NotFound(format!("function {function_id}")))?;

    if function.uid != user.id {
        return Err(ServiceError::Forbidden(format!(
            "function {function_id} belongs to another user"
        )));
    }

    store
        .delete(CUSTOM_FUNCTIONS, function_id)
        .await
        .map_err(ServiceError::persistence("failed to delete function"))?;
    info!(function_id, uid = %user.id, "custom function deleted");
    Ok(())
}
