use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::models::{Role, SeriesData, SeriesRequest, UserAccount, USERS};
use crate::series;
use crate::stats;
use crate::store::DocumentStore;

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    uid: String,
    #[serde(rename = "type")]
    series_type: String,
    points: u32,
    avg_error: f64,
    max_error: f64,
    submitted_at: DateTime<Utc>,
}

/// Replay submissions from a CSV file, in file order, through the statistics
/// updater. Returns the number of rows recorded.
pub async fn import_csv(
    store: &dyn DocumentStore,
    csv_path: &Path,
    write_attempts: u32,
) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("malformed row {}", line + 2))?;
        let request = SeriesRequest {
            series_type: row.series_type,
            points: row.points,
            avg_error: row.avg_error,
            max_error: row.max_error,
            data: SeriesData::default(),
        };
        series::validate(&request).with_context(|| format!("invalid row {}", line + 2))?;

        stats::record_series(store, &row.uid, &request, row.submitted_at, write_attempts)
            .await
            .with_context(|| format!("failed to record row {}", line + 2))?;
        inserted += 1;
    }

    info!(inserted, path = %csv_path.display(), "import finished");
    Ok(inserted)
}

/// Load demo users and their submissions. Returns false without writing
/// anything when the demo users are already present.
pub async fn seed(store: &dyn DocumentStore, write_attempts: u32) -> anyhow::Result<bool> {
    let now = Utc::now();
    let yesterday = now - Duration::days(1);

    let users = vec![
        ("seed-ada", "Ada Byron", "ada@seriesboard.dev", Role::Admin),
        ("seed-gauss", "Carl Gauss", "gauss@seriesboard.dev", Role::User),
        ("seed-noether", "Emmy Noether", "noether@seriesboard.dev", Role::User),
    ];

    let mut created = 0usize;
    for (id, name, email, role) in users {
        if store.get(USERS, id).await?.is_some() {
            continue;
        }
        let account = UserAccount {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            total_series_generated: 0,
            avg_error: 0.0,
            last_activity: yesterday,
        };
        store.set(USERS, id, serde_json::to_value(&account)?).await?;
        stats::register_in_dashboard(store, &account, write_attempts).await?;
        created += 1;
    }

    if created == 0 {
        info!("seed users already present, skipping demo submissions");
        return Ok(false);
    }

    let submissions = vec![
        ("seed-ada", "sine", 0.012, 0.041, yesterday),
        ("seed-gauss", "tangent", 0.35, 2.8, yesterday),
        ("seed-noether", "cosine", 0.018, 0.05, yesterday),
        ("seed-ada", "custom", 0.09, 0.4, now),
        ("seed-gauss", "sine", 0.02, 0.07, now),
    ];

    for (uid, series_type, avg_error, max_error, at) in submissions {
        let request = SeriesRequest {
            series_type: series_type.to_string(),
            points: 100,
            avg_error,
            max_error,
            data: SeriesData::default(),
        };
        stats::record_series(store, uid, &request, at, write_attempts).await?;
    }

    info!(users = created, "seed data inserted");
    Ok(true)
}
