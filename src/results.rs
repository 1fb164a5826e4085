use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use crate::error::ServiceError;
use crate::models::{
    AuthenticatedUser, SavedResult, SavedSeries, SeriesRecord, SERIES_HISTORY, SERIES_RESULTS,
};
use crate::store::{self, DocumentStore};

pub async fn save_result(
    store: &dyn DocumentStore,
    user: &AuthenticatedUser,
    series_id: &str,
    saved_at: DateTime<Utc>,
) -> Result<SavedResult, ServiceError> {
    let series_id = series_id.trim();
    if series_id.is_empty() {
        return Err(ServiceError::ValidationFailed("series id must not be empty".to_string()));
    }

    let exists = store
        .get(SERIES_HISTORY, series_id)
        .await
        .map_err(ServiceError::persistence("failed to save result"))?
        .is_some();
    if !exists {
        return Err(ServiceError::NotFound(format!("series {series_id}")));
    }

    let mut result = SavedResult {
        id: String::new(),
        uid: user.id.clone(),
        series_id: series_id.to_string(),
        date: saved_at,
    };

    let body = serde_json::to_value(&result)
        .map_err(|err| ServiceError::persistence("failed to save result")(err.into()))?;
    let id = store
        .add(SERIES_RESULTS, body)
        .await
        .map_err(ServiceError::persistence("failed to save result"))?;
    store
        .update(SERIES_RESULTS, &id, json!({ "id": id }))
        .await
        .map_err(ServiceError::persistence("failed to save result"))?;

    result.id = id;
    info!(result_id = %result.id, series_id, uid = %user.id, "result saved");
    Ok(result)
}

/// Saved results joined with their series. Results pointing at a series that
/// no longer exists are skipped.
pub async fn saved_results(
    store: &dyn DocumentStore,
    user: &AuthenticatedUser,
) -> Result<Vec<SavedSeries>, ServiceError> {
    let results: Vec<(String, SavedResult)> =
        store::collect_eq(store, SERIES_RESULTS, "uid", &user.id)
            .await
            .map_err(ServiceError::persistence("failed to load saved results"))?;

    let mut saved = Vec::with_capacity(results.len());
    for (result_id, result) in results {
        if result.series_id.is_empty() {
            continue;
        }

        let series: Option<SeriesRecord> = store::get_as(store, SERIES_HISTORY, &result.series_id)
            .await
            .map_err(ServiceError::persistence("failed to load saved results"))?;
        let Some(mut series) = series else {
            continue;
        };
        series.id = result.series_id.clone();

        saved.push(SavedSeries {
            result_id,
            series_id: result.series_id,
            date_saved: result.date,
            user_id: result.uid,
            series,
        });
    }

    Ok(saved)
}

pub async fn delete_result(
    store: &dyn DocumentStore,
    user: &AuthenticatedUser,
    result_id: &str,
) -> Result<(), ServiceError> {
    let result: SavedResult = store::get_as(store, SERIES_RESULTS, result_id)
        .await
        .map_err(ServiceError::persistence("failed to delete result"))?
        .ok_or_else(|| ServiceError::NotFound(format!("result {result_id}")))?;

    if result.uid != user.id {
        return Err(ServiceError::Forbidden(format!(
            "result {result_id} belongs to another user"
        )));
    }

    store
        .delete(SERIES_RESULTS, result_id)
        .await
        .map_err(ServiceError::persistence("failed to delete result"))?;
    info!(result_id, uid = %user.id, "result deleted");
    Ok(())
}
