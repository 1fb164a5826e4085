use chrono::{DateTime, Utc};

use crate::error::ServiceError;
use crate::models::{AuthenticatedUser, SeriesRecord, SeriesRequest, SERIES_HISTORY};
use crate::stats;
use crate::store::{self, DocumentStore};

pub fn validate(request: &SeriesRequest) -> Result<(), ServiceError> {
    if request.series_type.trim().is_empty() {
        return Err(ServiceError::ValidationFailed(
            "series type must not be empty".to_string(),
        ));
    }

    for (field, value) in [("avgError", request.avg_error), ("maxError", request.max_error)] {
        if !value.is_finite() || value < 0.0 {
            return Err(ServiceError::ValidationFailed(format!(
                "{field} must be a non-negative number, got {value}"
            )));
        }
    }

    let data = &request.data;
    let lengths = [
        data.labels.len(),
        data.generated.len(),
        data.ideal.len(),
        data.error.len(),
    ];
    if lengths.iter().any(|len| *len != lengths[0]) {
        return Err(ServiceError::ValidationFailed(format!(
            "series data arrays differ in length: {lengths:?}"
        )));
    }

    Ok(())
}

pub async fn submit(
    store: &dyn DocumentStore,
    user: &AuthenticatedUser,
    request: &SeriesRequest,
    submitted_at: DateTime<Utc>,
    write_attempts: u32,
) -> Result<SeriesRecord, ServiceError> {
    validate(request)?;
    stats::record_series(store, &user.id, request, submitted_at, write_attempts).await
}

pub async fn history(
    store: &dyn DocumentStore,
    user: &AuthenticatedUser,
) -> Result<Vec<SeriesRecord>, ServiceError> {
    let records: Vec<(String, SeriesRecord)> =
        store::collect_eq(store, SERIES_HISTORY, "uid", &user.id)
            .await
            .map_err(ServiceError::persistence("failed to load history"))?;

    let mut history: Vec<SeriesRecord> = records
        .into_iter()
        .map(|(id, mut record)| {
            record.id = id;
            record
        })
        .collect();
    history.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(history)
}
