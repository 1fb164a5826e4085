//! Incremental maintenance of user and dashboard statistics.
//!
//! A submission touches three documents in order: the new series record, the
//! submitting user's totals and the `dashboard/stats` singleton. Each of the
//! latter two is an optimistic read-modify-write, so concurrent submissions
//! re-read and re-apply instead of overwriting each other. The three writes
//! are not one transaction: if the dashboard write fails, the series and user
//! updates stay in place and the caller sees the failure.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{ServiceError, StoreError};
use crate::models::{
    DashboardStats, RankedSeries, RankedUser, Role, SeriesRecord, SeriesRequest, SeriesTypeStats,
    UserAccount, UserSnapshot, DASHBOARD, DASHBOARD_STATS_ID, SERIES_HISTORY, USERS,
};
use crate::ranking::{self, running_mean, RANKING_SIZE};
use crate::store::{self, DocumentStore};

const SAVE_FAILED: &str = "failed to save series";

impl UserAccount {
    /// Account created on the fly when a submission arrives for an unknown id.
    fn implicit(id: &str, avg_error: f64, at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            email: String::new(),
            role: Role::User,
            total_series_generated: 1,
            avg_error,
            last_activity: at,
        }
    }

    fn record_submission(&mut self, avg_error: f64, at: DateTime<Utc>) {
        self.avg_error = running_mean(self.avg_error, self.total_series_generated, avg_error);
        self.total_series_generated += 1;
        self.last_activity = at;
    }
}

impl DashboardStats {
    /// The dashboard as initialized by the very first submission.
    pub fn first_submission(
        user: &UserSnapshot,
        series_type: &str,
        avg_error: f64,
        max_error: f64,
        at: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::empty(at);
        stats.total_series_generated = 1;
        stats.global_avg_error = avg_error;
        stats.error_yesterday = avg_error;
        stats.series_growth = 1;
        stats.series_stats.insert(
            series_type.to_string(),
            SeriesTypeStats {
                count: 1,
                avg_error,
                max_error,
            },
        );
        stats.users = vec![UserSnapshot {
            total_series_generated: 1,
            avg_error,
            last_activity: at,
            ..user.clone()
        }];
        stats.top_performing_users = vec![RankedUser {
            name: String::new(),
            email: String::new(),
            avg_error,
        }];
        stats.high_error_series = vec![RankedSeries {
            series_type: series_type.to_string(),
            count: 1,
            avg_error,
        }];
        stats
    }

    /// Snapshot yesterday's totals when `at` falls on a later calendar day
    /// (UTC) than the last recorded update.
    pub fn roll_over(&mut self, at: DateTime<Utc>) -> bool {
        if self.last_update.date_naive() < at.date_naive() {
            self.series_yesterday = self.total_series_generated;
            self.error_yesterday = self.global_avg_error;
            self.last_update = at;
            true
        } else {
            false
        }
    }

    pub fn apply_submission(
        &mut self,
        user: &UserSnapshot,
        series_type: &str,
        avg_error: f64,
        max_error: f64,
        at: DateTime<Utc>,
    ) {
        self.roll_over(at);

        let new_total = self.total_series_generated + 1;
        let new_global_avg =
            running_mean(self.global_avg_error, self.total_series_generated, avg_error);

        self.series_growth = new_total as i64 - self.series_yesterday as i64;
        self.error_change = new_global_avg - self.error_yesterday;

        let type_stats = self
            .series_stats
            .entry(series_type.to_string())
            .or_insert(SeriesTypeStats {
                count: 0,
                avg_error: 0.0,
                max_error: 0.0,
            });
        type_stats.avg_error = running_mean(type_stats.avg_error, type_stats.count, avg_error);
        type_stats.count += 1;
        type_stats.max_error = type_stats.max_error.max(max_error);

        // Users missing from the snapshot list are not inserted here.
        if let Some(entry) = self.users.iter_mut().find(|u| u.id == user.id) {
            entry.total_series_generated = user.total_series_generated;
            entry.avg_error = user.avg_error;
            entry.last_activity = user.last_activity;
        }

        self.top_performing_users = ranking::top_performing_users(&self.users, RANKING_SIZE);
        self.high_error_series = ranking::high_error_series(&self.series_stats, RANKING_SIZE);

        self.total_series_generated = new_total;
        self.global_avg_error = new_global_avg;
    }

    /// Track a newly registered user. Registering twice is a no-op.
    pub fn register_user(&mut self, user: &UserSnapshot) {
        if self.users.iter().any(|u| u.id == user.id) {
            return;
        }
        self.users.push(user.clone());
        self.total_users += 1;
    }
}

/// Persist a series submission and fold it into the user and dashboard
/// statistics. Returns the stored record with its generated id.
pub async fn record_series(
    store: &dyn DocumentStore,
    uid: &str,
    request: &SeriesRequest,
    submitted_at: DateTime<Utc>,
    write_attempts: u32,
) -> Result<SeriesRecord, ServiceError> {
    let mut record = SeriesRecord {
        id: String::new(),
        uid: uid.to_string(),
        date: submitted_at,
        series_type: request.series_type.clone(),
        points: request.points,
        avg_error: request.avg_error,
        max_error: request.max_error,
        data: request.data.clone(),
    };

    let series_id = persist_series(store, &record)
        .await
        .map_err(ServiceError::persistence(SAVE_FAILED))?;
    record.id = series_id;

    let user = store::modify(store, USERS, uid, write_attempts, |existing: Option<UserAccount>| {
        match existing {
            Some(mut account) => {
                account.record_submission(request.avg_error, submitted_at);
                account
            }
            None => UserAccount::implicit(uid, request.avg_error, submitted_at),
        }
    })
    .await
    .map_err(|err| {
        warn!(series_id = %record.id, error = %err, "series stored but user totals not updated");
        ServiceError::persistence(SAVE_FAILED)(err)
    })?;

    let snapshot = user.snapshot();
    let dashboard = store::modify(
        store,
        DASHBOARD,
        DASHBOARD_STATS_ID,
        write_attempts,
        |existing: Option<DashboardStats>| match existing {
            Some(mut stats) => {
                stats.apply_submission(
                    &snapshot,
                    &request.series_type,
                    request.avg_error,
                    request.max_error,
                    submitted_at,
                );
                stats
            }
            None => DashboardStats::first_submission(
                &snapshot,
                &request.series_type,
                request.avg_error,
                request.max_error,
                submitted_at,
            ),
        },
    )
    .await
    .map_err(|err| {
        warn!(series_id = %record.id, error = %err, "series stored but dashboard not updated");
        ServiceError::persistence(SAVE_FAILED)(err)
    })?;

    info!(
        series_id = %record.id,
        uid,
        series_type = %record.series_type,
        total = dashboard.total_series_generated,
        "series recorded"
    );

    Ok(record)
}

async fn persist_series(
    store: &dyn DocumentStore,
    record: &SeriesRecord,
) -> Result<String, StoreError> {
    let id = store
        .add(SERIES_HISTORY, serde_json::to_value(record)?)
        .await?;
    store.update(SERIES_HISTORY, &id, json!({ "id": id })).await?;
    Ok(id)
}

/// Add a freshly registered user to the dashboard's snapshot list, creating
/// an empty dashboard if none exists yet.
pub async fn register_in_dashboard(
    store: &dyn DocumentStore,
    user: &UserAccount,
    write_attempts: u32,
) -> Result<DashboardStats, StoreError> {
    let snapshot = user.snapshot();
    store::modify(
        store,
        DASHBOARD,
        DASHBOARD_STATS_ID,
        write_attempts,
        |existing: Option<DashboardStats>| {
            let mut stats = existing.unwrap_or_else(|| DashboardStats::empty(user.last_activity));
            stats.register_user(&snapshot);
            stats
        },
    )
    .await
}

pub async fn load_dashboard(
    store: &dyn DocumentStore,
) -> Result<Option<DashboardStats>, ServiceError> {
    store::get_as(store, DASHBOARD, DASHBOARD_STATS_ID)
        .await
        .map_err(ServiceError::persistence("failed to load dashboard"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeriesData;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn request(series_type: &str, avg_error: f64, max_error: f64) -> SeriesRequest {
        SeriesRequest {
            series_type: series_type.to_string(),
            points: 4,
            avg_error,
            max_error,
            data: SeriesData::default(),
        }
    }

    fn account(id: &str, name: &str) -> UserAccount {
        UserAccount {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{id}@example.com"),
            role: Role::User,
            total_series_generated: 0,
            avg_error: 0.0,
            last_activity: at(1, 8),
        }
    }

    async fn seed_user(store: &MemoryStore, user: &UserAccount) {
        store
            .set(USERS, &user.id, serde_json::to_value(user).unwrap())
            .await
            .unwrap();
        register_in_dashboard(store, user, 3).await.unwrap();
    }

    async fn dashboard(store: &MemoryStore) -> DashboardStats {
        load_dashboard(store).await.unwrap().unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[tokio::test]
    async fn concurrent_dashboard_write_is_reapplied_not_lost() {
        let store = MemoryStore::new();
        seed_user(&store, &account("alice", "Alice")).await;
        seed_user(&store, &account("bob", "Bob")).await;
        record_series(&store, "alice", &request("sine", 0.2, 0.5), at(2, 9), 3)
            .await
            .unwrap();

        // bob's submission lands between alice's dashboard read and write
        let mut bob = account("bob", "Bob");
        bob.record_submission(0.6, at(2, 10));
        let bob = bob.snapshot();
        store.interleave_before_put(DASHBOARD, DASHBOARD_STATS_ID, move |current| {
            let mut stats: DashboardStats = serde_json::from_value(current.clone()).unwrap();
            stats.apply_submission(&bob, "cosine", 0.6, 0.9, at(2, 10));
            serde_json::to_value(stats).unwrap()
        });

        record_series(&store, "alice", &request("sine", 0.4, 0.7), at(2, 11), 3)
            .await
            .unwrap();

        let stats = dashboard(&store).await;
        assert_eq!(stats.total_series_generated, 3);
        assert!(close(stats.global_avg_error, 0.4));
        assert_eq!(stats.series_stats["cosine"].count, 1);
        assert_eq!(stats.series_stats["sine"].count, 2);
        assert!(close(stats.series_stats["sine"].avg_error, 0.3));
    }

    #[tokio::test]
    async fn first_submission_creates_the_dashboard() {
        let store = MemoryStore::new();
        let record = record_series(&store, "alice", &request("sine", 0.1, 0.5), at(2, 9), 3)
            .await
            .unwrap();

        assert!(!record.id.is_empty());
        let stored = store.get(SERIES_HISTORY, &record.id).await.unwrap().unwrap();
        assert_eq!(stored.body["id"], record.id.as_str());
        assert_eq!(stored.body["uid"], "alice");

        let stats = dashboard(&store).await;
        assert_eq!(stats.total_series_generated, 1);
        assert!(close(stats.global_avg_error, 0.1));
        assert_eq!(stats.series_yesterday, 0);
        assert!(close(stats.error_yesterday, 0.1));
        assert_eq!(stats.series_growth, 1);
        assert_eq!(stats.error_change, 0.0);
        assert_eq!(stats.last_update, at(2, 9));
        assert_eq!(
            stats.series_stats["sine"],
            SeriesTypeStats {
                count: 1,
                avg_error: 0.1,
                max_error: 0.5
            }
        );
        assert_eq!(stats.users.len(), 1);
        assert_eq!(stats.users[0].id, "alice");
        assert_eq!(stats.top_performing_users.len(), 1);
        assert_eq!(stats.top_performing_users[0].name, "");
        assert_eq!(stats.high_error_series[0].series_type, "sine");

        let alice: UserAccount = store::get_as(&store, USERS, "alice").await.unwrap().unwrap();
        assert_eq!(alice.total_series_generated, 1);
        assert!(close(alice.avg_error, 0.1));
        assert_eq!(alice.role, Role::User);
    }

    #[tokio::test]
    async fn global_average_is_folded_incrementally() {
        let store = MemoryStore::new();
        let mut stats = DashboardStats::empty(at(2, 8));
        stats.total_series_generated = 5;
        stats.global_avg_error = 0.2;
        store
            .set(DASHBOARD, DASHBOARD_STATS_ID, serde_json::to_value(&stats).unwrap())
            .await
            .unwrap();

        record_series(&store, "alice", &request("sine", 0.8, 0.9), at(2, 9), 3)
            .await
            .unwrap();

        let stats = dashboard(&store).await;
        assert_eq!(stats.total_series_generated, 6);
        assert!(close(stats.global_avg_error, (0.2 * 5.0 + 0.8) / 6.0));
    }

    #[tokio::test]
    async fn series_type_stats_track_count_mean_and_max() {
        let store = MemoryStore::new();
        record_series(&store, "alice", &request("cosine", 0.2, 0.9), at(2, 9), 3)
            .await
            .unwrap();
        record_series(&store, "alice", &request("cosine", 0.6, 0.7), at(2, 10), 3)
            .await
            .unwrap();

        let cosine = dashboard(&store).await.series_stats["cosine"];
        assert_eq!(cosine.count, 2);
        assert!(close(cosine.avg_error, 0.4));
        assert!(close(cosine.max_error, 0.9));
    }

    #[tokio::test]
    async fn user_average_is_the_mean_of_their_submissions() {
        let store = MemoryStore::new();
        seed_user(&store, &account("bob", "Bob")).await;

        let values = [0.3, 0.05, 0.6, 0.25, 0.1];
        for (i, value) in values.iter().enumerate() {
            let submitted_at = at(2, 9) + Duration::minutes(i as i64);
            record_series(&store, "bob", &request("sine", *value, 1.0), submitted_at, 3)
                .await
                .unwrap();
        }

        let bob: UserAccount = store::get_as(&store, USERS, "bob").await.unwrap().unwrap();
        let expected = values.iter().sum::<f64>() / values.len() as f64;
        assert_eq!(bob.total_series_generated, values.len() as u64);
        assert!(close(bob.avg_error, expected));
        assert_eq!(bob.name, "Bob");

        let stats = dashboard(&store).await;
        let entry = stats.users.iter().find(|u| u.id == "bob").unwrap();
        assert!(close(entry.avg_error, expected));
        assert_eq!(entry.total_series_generated, values.len() as u64);
    }

    #[tokio::test]
    async fn yesterday_snapshot_moves_only_on_a_new_day() {
        let store = MemoryStore::new();
        record_series(&store, "alice", &request("sine", 0.2, 0.3), at(2, 9), 3)
            .await
            .unwrap();
        record_series(&store, "alice", &request("sine", 0.4, 0.5), at(2, 18), 3)
            .await
            .unwrap();

        let same_day = dashboard(&store).await;
        assert_eq!(same_day.series_yesterday, 0);
        assert_eq!(same_day.last_update, at(2, 9));
        assert_eq!(same_day.series_growth, 2);

        record_series(&store, "alice", &request("sine", 0.9, 1.0), at(3, 1), 3)
            .await
            .unwrap();

        let next_day = dashboard(&store).await;
        assert_eq!(next_day.series_yesterday, 2);
        assert!(close(next_day.error_yesterday, 0.3));
        assert_eq!(next_day.last_update, at(3, 1));
        assert_eq!(next_day.total_series_generated, 3);
        assert_eq!(
            next_day.series_growth,
            next_day.total_series_generated as i64 - next_day.series_yesterday as i64
        );
        assert!(close(
            next_day.error_change,
            next_day.global_avg_error - next_day.error_yesterday
        ));

        record_series(&store, "alice", &request("sine", 0.1, 0.2), at(3, 20), 3)
            .await
            .unwrap();
        let later = dashboard(&store).await;
        assert_eq!(later.series_yesterday, 2);
        assert_eq!(later.series_growth, 2);
    }

    #[tokio::test]
    async fn rankings_skip_idle_users_and_stay_bounded() {
        let store = MemoryStore::new();
        for (id, name) in [("a", "Ana"), ("b", "Ben"), ("c", "Cy"), ("d", "Di"), ("idle", "Idle")] {
            seed_user(&store, &account(id, name)).await;
        }

        let submissions = [
            ("a", "sine", 0.4),
            ("b", "cosine", 0.1),
            ("c", "tangent", 0.9),
            ("d", "custom", 0.3),
            ("a", "sine", 0.2),
        ];
        for (i, (uid, series_type, avg)) in submissions.iter().enumerate() {
            let submitted_at = at(2, 9) + Duration::minutes(i as i64);
            record_series(&store, uid, &request(series_type, *avg, 1.0), submitted_at, 3)
                .await
                .unwrap();
        }

        let stats = dashboard(&store).await;
        assert_eq!(stats.total_users, 5);

        let top = &stats.top_performing_users;
        assert_eq!(top.len(), 3);
        assert!(top.iter().all(|u| u.avg_error > 0.0 && u.name != "Idle"));
        assert!(top.windows(2).all(|w| w[0].avg_error <= w[1].avg_error));
        assert_eq!(top[0].name, "Ben");

        let high = &stats.high_error_series;
        assert_eq!(high.len(), 3);
        assert!(high.windows(2).all(|w| w[0].avg_error >= w[1].avg_error));
        assert_eq!(high[0].series_type, "tangent");
        let mut types: Vec<&str> = high.iter().map(|s| s.series_type.as_str()).collect();
        types.dedup();
        assert_eq!(types.len(), 3);
    }

    #[tokio::test]
    async fn unknown_users_are_created_but_not_added_to_the_snapshot_list() {
        let store = MemoryStore::new();
        seed_user(&store, &account("alice", "Alice")).await;

        record_series(&store, "ghost", &request("sine", 0.5, 0.6), at(2, 9), 3)
            .await
            .unwrap();

        let ghost: UserAccount = store::get_as(&store, USERS, "ghost").await.unwrap().unwrap();
        assert_eq!(ghost.total_series_generated, 1);
        assert_eq!(ghost.name, "");

        let stats = dashboard(&store).await;
        assert!(stats.users.iter().all(|u| u.id != "ghost"));
        assert_eq!(stats.total_series_generated, 1);
    }

    #[tokio::test]
    async fn dashboard_failure_leaves_earlier_writes_in_place() {
        let store = MemoryStore::new();
        seed_user(&store, &account("alice", "Alice")).await;
        store.fail_writes_to(DASHBOARD);

        let err = record_series(&store, "alice", &request("sine", 0.5, 0.6), at(2, 9), 3)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "persistence_failed");
        assert!(err.to_string().starts_with(SAVE_FAILED));

        let history: Vec<(String, SeriesRecord)> =
            store::collect_eq(&store, SERIES_HISTORY, "uid", "alice").await.unwrap();
        assert_eq!(history.len(), 1);
        let alice: UserAccount = store::get_as(&store, USERS, "alice").await.unwrap().unwrap();
        assert_eq!(alice.total_series_generated, 1);
    }

    #[tokio::test]
    async fn series_write_failure_stops_before_touching_statistics() {
        let store = MemoryStore::new();
        store.fail_writes_to(SERIES_HISTORY);

        let err = record_series(&store, "alice", &request("sine", 0.5, 0.6), at(2, 9), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PersistenceFailed { .. }));
        assert!(store.get(USERS, "alice").await.unwrap().is_none());
        assert!(load_dashboard(&store).await.unwrap().is_none());
    }

    #[test]
    fn roll_over_ignores_earlier_timestamps() {
        let mut stats = DashboardStats::empty(at(5, 12));
        stats.total_series_generated = 7;
        assert!(!stats.roll_over(at(4, 23)));
        assert!(!stats.roll_over(at(5, 23)));
        assert_eq!(stats.series_yesterday, 0);
        assert!(stats.roll_over(at(6, 0)));
        assert_eq!(stats.series_yesterday, 7);
    }

    #[test]
    fn registering_twice_counts_once() {
        let mut stats = DashboardStats::empty(at(1, 0));
        let user = account("alice", "Alice").snapshot();
        stats.register_user(&user);
        stats.register_user(&user);
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.users.len(), 1);
    }
}
