use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const USERS: &str = "users";
pub const SERIES_HISTORY: &str = "series_history";
pub const SERIES_RESULTS: &str = "series_results";
pub const CUSTOM_FUNCTIONS: &str = "custom_functions";
pub const DASHBOARD: &str = "dashboard";
pub const DASHBOARD_STATS_ID: &str = "stats";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Persisted at `users/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub total_series_generated: u64,
    #[serde(default)]
    pub avg_error: f64,
    pub last_activity: DateTime<Utc>,
}

impl UserAccount {
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            total_series_generated: self.total_series_generated,
            avg_error: self.avg_error,
            last_activity: self.last_activity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub generated: Vec<f64>,
    #[serde(default)]
    pub ideal: Vec<f64>,
    #[serde(default)]
    pub error: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRequest {
    #[serde(rename = "type")]
    pub series_type: String,
    pub points: u32,
    #[serde(rename = "avgError")]
    pub avg_error: f64,
    #[serde(rename = "maxError")]
    pub max_error: f64,
    #[serde(default)]
    pub data: SeriesData,
}

/// Persisted at `series_history/{id}`; immutable once the id is stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub uid: String,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub series_type: String,
    pub points: u32,
    #[serde(rename = "avgError")]
    pub avg_error: f64,
    #[serde(rename = "maxError")]
    pub max_error: f64,
    #[serde(default)]
    pub data: SeriesData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub uid: String,
    #[serde(rename = "seriesId", default)]
    pub series_id: String,
    pub date: DateTime<Utc>,
}

/// A saved result joined with the series it points at.
#[derive(Debug, Clone, Serialize)]
pub struct SavedSeries {
    #[serde(rename = "resultId")]
    pub result_id: String,
    #[serde(rename = "seriesId")]
    pub series_id: String,
    #[serde(rename = "dateSaved")]
    pub date_saved: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub series: SeriesRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFunction {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub uid: String,
    pub name: String,
    pub expression: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSummary {
    pub id: String,
    pub name: String,
    pub expression: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesTypeStats {
    pub count: u64,
    pub avg_error: f64,
    pub max_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub total_series_generated: u64,
    pub avg_error: f64,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedUser {
    pub name: String,
    pub email: String,
    pub avg_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSeries {
    #[serde(rename = "type")]
    pub series_type: String,
    pub count: u64,
    pub avg_error: f64,
}

/// Singleton persisted at `dashboard/stats`.
///
/// `series_stats` is a `BTreeMap`, so iteration (and therefore the tie-break
/// of equal averages in `high_error_series`) follows type name order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_series_generated: u64,
    pub global_avg_error: f64,
    pub series_yesterday: u64,
    pub error_yesterday: f64,
    pub series_growth: i64,
    pub error_change: f64,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub series_stats: BTreeMap<String, SeriesTypeStats>,
    #[serde(default)]
    pub users: Vec<UserSnapshot>,
    #[serde(default)]
    pub top_performing_users: Vec<RankedUser>,
    #[serde(default)]
    pub high_error_series: Vec<RankedSeries>,
}

impl DashboardStats {
    /// A dashboard with no submissions yet, as created by the first registration.
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            total_series_generated: 0,
            global_avg_error: 0.0,
            series_yesterday: 0,
            error_yesterday: 0.0,
            series_growth: 0,
            error_change: 0.0,
            last_update: at,
            total_users: 0,
            series_stats: BTreeMap::new(),
            users: Vec::new(),
            top_performing_users: Vec::new(),
            high_error_series: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn series_record_uses_persisted_field_names() {
        let record = SeriesRecord {
            id: String::new(),
            uid: "alice".to_string(),
            date: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            series_type: "sine".to_string(),
            points: 3,
            avg_error: 0.1,
            max_error: 0.5,
            data: SeriesData::default(),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "sine");
        assert_eq!(value["avgError"], 0.1);
        assert_eq!(value["maxError"], 0.5);
        assert!(value.get("id").is_none());
    }

    #[test]
    fn role_defaults_to_user_when_missing() {
        let value = serde_json::json!({
            "id": "bob",
            "last_activity": "2026-03-01T09:00:00Z"
        });
        let account: UserAccount = serde_json::from_value(value).unwrap();
        assert_eq!(account.role, Role::User);
        assert_eq!(account.total_series_generated, 0);
        assert_eq!(account.avg_error, 0.0);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
    }
}
