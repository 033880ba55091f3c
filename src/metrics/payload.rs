//! The aggregate payload and its constituent types.
//!
//! REST-sourced types keep the upstream's snake_case field names so they
//! deserialize straight off the wire and serialize back out unchanged.
//! Calendar types are camelCase because they come from (and are rendered
//! like) the GraphQL contribution calendar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cumulative bytes of code per language across every repository an identity
/// owns. Ordered map so serialized output is stable.
pub type LanguageByteMap = BTreeMap<String, u64>;

/// Account-level counters. A zero here means "zero or unavailable"; soft
/// fetch failures are not distinguishable from genuine zeroes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStats {
    pub public_repos: u64,
    pub followers: u64,
    pub following: u64,
    pub total_stars: u64,
    pub total_forks: u64,
    pub total_issues: u64,
    pub total_prs: u64,
    pub total_commits: u64,
}

/// Wire type for the account profile endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountProfile {
    #[serde(default)]
    pub public_repos: u64,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub following: u64,
}

/// One repository as returned by the repository listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub id: u64,
    pub name: String,
    pub owner: RepositoryOwner,
    pub html_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub language: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryOwner {
    pub login: String,
}

/// One week of commit activity from the repository statistics endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitActivityWeek {
    /// Unix timestamp of the week's first day.
    pub week: i64,

    /// Commits made during that week.
    pub total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionDay {
    pub date: String,
    pub contribution_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekday: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionWeek {
    pub first_day: String,
    pub contribution_days: Vec<ContributionDay>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMonth {
    pub name: String,
    pub year: i32,
    pub first_day: String,
    pub total_weeks: u32,
}

/// One-year contribution heatmap: total count plus chronological week buckets,
/// each holding up to seven day records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionCalendar {
    pub total_contributions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
    #[serde(default)]
    pub months: Vec<CalendarMonth>,
    pub weeks: Vec<ContributionWeek>,
}

/// The unit delivered to callers and stored in the cache. Created whole by a
/// successful aggregation and never partially updated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatePayload {
    pub stats: AccountStats,

    /// The most-recently-updated repositories, newest first, at most six.
    pub repos: Vec<RepositorySummary>,

    pub languages: LanguageByteMap,

    /// Merged weekly commit activity across the commit-scan repositories,
    /// chronological. Empty when the statistics never materialized.
    pub commit_activity: Vec<CommitActivityWeek>,

    /// Absent when no credential was configured or the calendar query failed.
    #[serde(rename = "contributionCalendar", default, skip_serializing_if = "Option::is_none")]
    pub contribution_calendar: Option<ContributionCalendar>,
}
