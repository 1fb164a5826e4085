use std::fmt::Write;

use crate::models::DashboardStats;

pub fn build_report(stats: Option<&DashboardStats>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Series Dashboard Report");

    let Some(stats) = stats else {
        let _ = writeln!(output);
        let _ = writeln!(output, "No series have been recorded yet.");
        return output;
    };

    let _ = writeln!(
        output,
        "Last rollover {} ({} registered users)",
        stats.last_update.format("%Y-%m-%d %H:%M UTC"),
        stats.total_users
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Totals");
    let _ = writeln!(
        output,
        "- Series generated: {} ({:+} since yesterday's {})",
        stats.total_series_generated, stats.series_growth, stats.series_yesterday
    );
    let _ = writeln!(
        output,
        "- Global average error: {:.4} ({:+.4} vs yesterday's {:.4})",
        stats.global_avg_error, stats.error_change, stats.error_yesterday
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Series Mix");

    if stats.series_stats.is_empty() {
        let _ = writeln!(output, "No series recorded.");
    } else {
        let mut mix: Vec<_> = stats.series_stats.iter().collect();
        mix.sort_by(|a, b| b.1.count.cmp(&a.1.count));
        for (series_type, s) in mix {
            let _ = writeln!(
                output,
                "- {}: {} series (avg error {:.4}, max error {:.4})",
                series_type, s.count, s.avg_error, s.max_error
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Performing Users");

    if stats.top_performing_users.is_empty() {
        let _ = writeln!(output, "No users with submissions yet.");
    } else {
        for (rank, user) in stats.top_performing_users.iter().enumerate() {
            let name = if user.name.is_empty() { "(unnamed)" } else { user.name.as_str() };
            let _ = writeln!(
                output,
                "{}. {} <{}> avg error {:.4}",
                rank + 1,
                name,
                user.email,
                user.avg_error
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Error Series");

    if stats.high_error_series.is_empty() {
        let _ = writeln!(output, "No series recorded.");
    } else {
        for (rank, series) in stats.high_error_series.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {} avg error {:.4} across {} series",
                rank + 1,
                series.series_type,
                series.avg_error,
                series.count
            );
        }
    }

    let mut active = stats.users.clone();
    active.retain(|u| u.total_series_generated > 0);
    active.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recently Active Users");

    if active.is_empty() {
        let _ = writeln!(output, "No activity recorded.");
    } else {
        for user in active.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({} series, avg error {:.4}) last active {}",
                user.id,
                user.total_series_generated,
                user.avg_error,
                user.last_activity.format("%Y-%m-%d %H:%M")
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserSnapshot;
    use chrono::{TimeZone, Utc};

    #[test]
    fn empty_dashboard_says_so() {
        let report = build_report(None);
        assert!(report.contains("No series have been recorded yet."));
    }

    #[test]
    fn report_lists_totals_and_rankings() {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let user = UserSnapshot {
            id: "alice".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            total_series_generated: 0,
            avg_error: 0.0,
            last_activity: at,
        };
        let mut stats = DashboardStats::first_submission(&user, "sine", 0.1, 0.5, at);
        stats.top_performing_users[0].name = "Alice".to_string();

        let report = build_report(Some(&stats));
        assert!(report.contains("- Series generated: 1 (+1 since yesterday's 0)"));
        assert!(report.contains("- sine: 1 series (avg error 0.1000, max error 0.5000)"));
        assert!(report.contains("1. Alice <> avg error 0.1000"));
        assert!(report.contains("1. sine avg error 0.1000 across 1 series"));
        assert!(report.contains("- alice (1 series, avg error 0.1000)"));
    }
}
