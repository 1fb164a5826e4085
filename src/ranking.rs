use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::models::{RankedSeries, RankedUser, SeriesTypeStats, UserSnapshot};

pub const RANKING_SIZE: usize = 3;

/// Users with the lowest average error first. An average of zero means the
/// user has not submitted anything yet, so those users are left out.
pub fn top_performing_users(users: &[UserSnapshot], limit: usize) -> Vec<RankedUser> {
    let mut ranked: Vec<&UserSnapshot> = users.iter().filter(|u| u.avg_error > 0.0).collect();
    ranked.sort_by(|a, b| a.avg_error.partial_cmp(&b.avg_error).unwrap_or(Ordering::Equal));

    ranked
        .into_iter()
        .take(limit)
        .map(|u| RankedUser {
            name: u.name.clone(),
            email: u.email.clone(),
            avg_error: u.avg_error,
        })
        .collect()
}

/// Series types with the highest average error first. The sort is stable
/// over the map's key order, so equal averages rank alphabetically by type.
pub fn high_error_series(
    stats: &BTreeMap<String, SeriesTypeStats>,
    limit: usize,
) -> Vec<RankedSeries> {
    let mut ranked: Vec<(&String, &SeriesTypeStats)> = stats.iter().collect();
    ranked.sort_by(|a, b| b.1.avg_error.partial_cmp(&a.1.avg_error).unwrap_or(Ordering::Equal));

    ranked
        .into_iter()
        .take(limit)
        .map(|(series_type, s)| RankedSeries {
            series_type: series_type.clone(),
            count: s.count,
            avg_error: s.avg_error,
        })
        .collect()
}

/// Incremental mean: folds `value` into an average over `count` samples.
pub fn running_mean(avg: f64, count: u64, value: f64) -> f64 {
    (avg * count as f64 + value) / (count + 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(name: &str, avg_error: f64) -> UserSnapshot {
        UserSnapshot {
            id: name.to_string(),
            name: name.to_string(),
            email: format!("{name}@example.com"),
            total_series_generated: if avg_error > 0.0 { 1 } else { 0 },
            avg_error,
            last_activity: Utc::now(),
        }
    }

    fn type_stats(count: u64, avg_error: f64) -> SeriesTypeStats {
        SeriesTypeStats {
            count,
            avg_error,
            max_error: avg_error * 2.0,
        }
    }

    #[test]
    fn users_without_submissions_are_not_ranked() {
        let users = vec![
            snapshot("idle", 0.0),
            snapshot("bob", 0.4),
            snapshot("alice", 0.1),
        ];

        let ranked = top_performing_users(&users, RANKING_SIZE);
        let names: Vec<&str> = ranked.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn top_users_are_capped_and_ascending() {
        let users = vec![
            snapshot("a", 0.5),
            snapshot("b", 0.2),
            snapshot("c", 0.9),
            snapshot("d", 0.3),
        ];

        let ranked = top_performing_users(&users, RANKING_SIZE);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.windows(2).all(|w| w[0].avg_error <= w[1].avg_error));
        assert_eq!(ranked[0].name, "b");
    }

    #[test]
    fn high_error_series_is_descending_with_alphabetical_ties() {
        let mut stats = BTreeMap::new();
        stats.insert("tangent".to_string(), type_stats(2, 0.7));
        stats.insert("sine".to_string(), type_stats(4, 0.2));
        stats.insert("cosine".to_string(), type_stats(1, 0.2));
        stats.insert("custom".to_string(), type_stats(3, 0.1));

        let ranked = high_error_series(&stats, RANKING_SIZE);
        let types: Vec<&str> = ranked.iter().map(|s| s.series_type.as_str()).collect();
        assert_eq!(types, vec!["tangent", "cosine", "sine"]);
    }

    #[test]
    fn running_mean_matches_arithmetic_mean() {
        let values = [0.3, 0.1, 0.8, 0.4];
        let mut avg = 0.0;
        for (count, value) in values.iter().enumerate() {
            avg = running_mean(avg, count as u64, *value);
        }
        let expected: f64 = values.iter().sum::<f64>() / values.len() as f64;
        assert!((avg - expected).abs() < 1e-9);
    }
}
