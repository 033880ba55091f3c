//! The metrics aggregation pipeline.
//!
//! One public operation: [`MetricsService::get_metrics`]. On a cache miss it
//! fetches the account profile, walks the full repository listing, folds the
//! scalar counters, batches per-repository language and commit lookups, and
//! (when a credential is configured) adds the contribution calendar and the
//! authored-PR count. Profile and listing failures are fatal; everything else
//! degrades to empty, zero, or absent fields.

use crate::Result;
use crate::error::{MetricsError, RateLimitHint};
use crate::github::backoff::{self, BackoffPolicy, PollOutcome};
use crate::github::batch;
use crate::github::client::GithubClient;
use crate::github::pagination;
use crate::metrics::cache::{Clock, MetricsCache, SystemClock};
use crate::metrics::payload::{
    AccountProfile, AccountStats, AggregatePayload, CommitActivityWeek, ContributionCalendar, LanguageByteMap, RepositorySummary,
};
use chrono::{Days, Local};
use ohno::IntoAppError;
use reqwest::header::LINK;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

const LOG_TARGET: &str = " aggregate";

/// How long a computed payload stays fresh.
const CACHE_TTL: core::time::Duration = core::time::Duration::from_secs(10 * 60);

/// Commit totals and weekly activity are estimated from at most this many
/// most-recently-updated repositories. Large accounts are approximated,
/// never exhaustively scanned.
const COMMIT_SCAN_LIMIT: usize = 30;

/// Number of most-recently-updated repositories surfaced on the payload.
const RECENT_REPO_LIMIT: usize = 6;

/// Status the upstream answers while repository statistics are still being
/// generated.
const STATUS_COMPUTING: u16 = 202;

/// Span of the contribution-calendar window, in days.
const CALENDAR_WINDOW_DAYS: u64 = 365;

const CALENDAR_QUERY: &str = "\
query($login: String!, $from: DateTime!, $to: DateTime!) {
  user(login: $login) {
    contributionsCollection(from: $from, to: $to) {
      contributionCalendar {
        totalContributions
        colors
        months { name year firstDay totalWeeks }
        weeks {
          firstDay
          contributionDays { date contributionCount color weekday }
        }
      }
    }
  }
}";

/// Tunables for the aggregation pipeline. The defaults match production use;
/// tests shrink the delays and limits.
#[derive(Debug, Clone)]
pub struct MetricsOptions {
    /// How long a computed payload is served from cache.
    pub cache_ttl: core::time::Duration,

    /// In-flight ceiling for per-repository fetches.
    pub concurrency: usize,

    /// Upper bound on repositories scanned for commit counts and activity.
    pub commit_scan_limit: usize,

    /// How many recently-updated repositories the payload surfaces.
    pub recent_repo_limit: usize,

    /// Retry schedule for the commit-statistics endpoint.
    pub backoff: BackoffPolicy,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            cache_ttl: CACHE_TTL,
            concurrency: batch::DEFAULT_CONCURRENCY,
            commit_scan_limit: COMMIT_SCAN_LIMIT,
            recent_repo_limit: RECENT_REPO_LIMIT,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Aggregates GitHub statistics for one account into an [`AggregatePayload`],
/// caching results per identity.
#[derive(Debug)]
pub struct MetricsService {
    client: GithubClient,
    cache: MetricsCache,
    options: MetricsOptions,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MetricsService {
    /// Service with production defaults. A token enables the contribution
    /// calendar and the PR count; without one those fields stay absent/zero.
    pub fn new(token: Option<&str>) -> Result<Self> {
        Ok(Self::with_options(GithubClient::new(token)?, MetricsOptions::default(), Arc::new(SystemClock)))
    }

    /// Service with explicit client, tunables, and clock.
    #[must_use]
    pub fn with_options(client: GithubClient, options: MetricsOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: MetricsCache::new(options.cache_ttl, clock),
            client,
            options,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached payload for `identity`, or aggregate a fresh one.
    ///
    /// `force_refresh` bypasses the cache read; a successful aggregation still
    /// writes a fresh entry either way. Concurrent calls for the same identity
    /// during a miss collapse onto a single aggregation; later callers wait
    /// and then read what the first one cached.
    pub async fn get_metrics(&self, identity: &str, force_refresh: bool) -> Result<Arc<AggregatePayload>, MetricsError> {
        if !force_refresh
            && let Some(hit) = self.cache.get(identity)
        {
            log::debug!(target: LOG_TARGET, "cache hit for '{identity}'");
            return Ok(hit);
        }

        let flight = self.flight_lock(identity).await;
        let _guard = flight.lock().await;

        // Re-check under the lock: another caller may have finished while we
        // waited.
        if !force_refresh
            && let Some(hit) = self.cache.get(identity)
        {
            return Ok(hit);
        }

        let payload = Arc::new(self.aggregate(identity).await?);
        self.cache.put(identity, Arc::clone(&payload));

        Ok(payload)
    }

    /// Per-identity single-flight lock. Locks accumulate per identity like the
    /// cache entries themselves do; the identity set is expected to stay small.
    async fn flight_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(in_flight.entry(identity.to_owned()).or_default())
    }

    async fn aggregate(&self, identity: &str) -> Result<AggregatePayload, MetricsError> {
        log::info!(target: LOG_TARGET, "aggregating metrics for '{identity}'");

        let profile = self.fetch_profile(identity).await?;

        let mut repos: Vec<RepositorySummary> = pagination::fetch_collection(
            &self.client,
            &format!("/users/{identity}/repos?per_page={}&page=1&sort=updated", pagination::PAGE_SIZE),
        )
        .await?;

        // Commutative fold; repository order is irrelevant.
        let (total_stars, total_forks, total_issues) = fold_repo_counters(&repos);

        let languages = self.fetch_languages(&repos).await;

        // The listing is requested sorted by update time, but don't rely on
        // upstream ordering for the bounds below.
        repos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let commit_targets = &repos[..repos.len().min(self.options.commit_scan_limit)];

        let total_commits = self.fetch_commit_total(commit_targets).await;
        let commit_activity = self.fetch_commit_activity(commit_targets).await;
        let contribution_calendar = self.fetch_contribution_calendar(identity).await;
        let total_prs = self.fetch_pull_request_total(identity).await;

        let recent = repos.iter().take(self.options.recent_repo_limit).cloned().collect();

        Ok(AggregatePayload {
            stats: AccountStats {
                public_repos: profile.public_repos,
                followers: profile.followers,
                following: profile.following,
                total_stars,
                total_forks,
                total_issues,
                total_prs,
                total_commits,
            },
            repos: recent,
            languages,
            commit_activity,
            contribution_calendar,
        })
    }

    async fn fetch_profile(&self, identity: &str) -> Result<AccountProfile, MetricsError> {
        let resp = self.client.get(&format!("/users/{identity}")).await?;

        let status = resp.status();
        if !status.is_success() {
            let rate_limit = RateLimitHint::from_headers(resp.headers());
            log::warn!(target: LOG_TARGET, "account fetch for '{identity}' returned status {status}");
            return Err(MetricsError::AccountNotFound {
                status: status.as_u16(),
                rate_limit,
            });
        }

        Ok(resp
            .json()
            .await
            .into_app_err_with(|| format!("could not parse account profile for '{identity}'"))?)
    }

    /// Language bytes across all repositories, merged by addition. A failed
    /// repository contributes nothing.
    async fn fetch_languages(&self, repos: &[RepositorySummary]) -> LanguageByteMap {
        let per_repo = batch::run_chunked(repos, self.options.concurrency, |repo| {
            let client = self.client.clone();
            async move {
                let resp = client.get(&format!("/repos/{}/{}/languages", repo.owner.login, repo.name)).await?;
                if !resp.status().is_success() {
                    return Ok(LanguageByteMap::new());
                }

                resp.json()
                    .await
                    .into_app_err_with(|| format!("could not parse languages for '{}'", repo.name))
            }
        })
        .await;

        merge_language_maps(per_repo)
    }

    /// Estimated commit total: one count per repository, summed.
    async fn fetch_commit_total(&self, repos: &[RepositorySummary]) -> u64 {
        let counts: Vec<u64> = batch::run_chunked(repos, self.options.concurrency, |repo| {
            let client = self.client.clone();
            async move { commit_count(&client, &repo.owner.login, &repo.name).await }
        })
        .await;

        counts.iter().sum()
    }

    /// Weekly commit activity merged across the commit-scan repositories.
    ///
    /// The statistics endpoint may answer 202 while the upstream computes, so
    /// each repository is polled through the backoff retrier. Repositories
    /// whose statistics never materialize contribute nothing.
    async fn fetch_commit_activity(&self, repos: &[RepositorySummary]) -> Vec<CommitActivityWeek> {
        let policy = self.options.backoff;

        let per_repo: Vec<Vec<CommitActivityWeek>> = batch::run_chunked(repos, self.options.concurrency, |repo| {
            let client = self.client.clone();
            async move {
                let weeks = backoff::retry_until_ready(&policy, || {
                    poll_commit_activity(&client, &repo.owner.login, &repo.name)
                })
                .await;
                Ok(weeks.unwrap_or_default())
            }
        })
        .await;

        let mut merged: BTreeMap<i64, u64> = BTreeMap::new();
        for weeks in per_repo {
            for entry in weeks {
                *merged.entry(entry.week).or_insert(0) += entry.total;
            }
        }

        merged.into_iter().map(|(week, total)| CommitActivityWeek { week, total }).collect()
    }

    /// One-year contribution calendar via a single GraphQL query. Requires a
    /// credential; any failure leaves the calendar absent.
    async fn fetch_contribution_calendar(&self, identity: &str) -> Option<ContributionCalendar> {
        if !self.client.has_token() {
            return None;
        }

        let today = Local::now().date_naive();
        let from = (today - Days::new(CALENDAR_WINDOW_DAYS))
            .and_hms_opt(0, 0, 0)?
            .and_local_timezone(Local)
            .earliest()?;
        let to = today.and_hms_opt(23, 59, 59)?.and_local_timezone(Local).latest()?;

        let variables = serde_json::json!({
            "login": identity,
            "from": from.to_rfc3339(),
            "to": to.to_rfc3339(),
        });

        let data: CalendarData = self.client.graphql(CALENDAR_QUERY, variables).await?;
        let calendar = data
            .user
            .and_then(|user| user.contributions_collection)
            .and_then(|collection| collection.contribution_calendar);

        if calendar.is_none() {
            log::warn!(target: LOG_TARGET, "contribution calendar missing from GraphQL response for '{identity}'");
        }

        calendar
    }

    /// Authored pull requests via the issue search endpoint. Only reliable
    /// with a credential; without one, or on failure, stays at zero.
    async fn fetch_pull_request_total(&self, identity: &str) -> u64 {
        if !self.client.has_token() {
            return 0;
        }

        let resp = match self.client.get(&pull_request_search_path(identity)).await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "pull request search for '{identity}' failed: {e:#}");
                return 0;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            log::warn!(target: LOG_TARGET, "pull request search for '{identity}' returned status {status}");
            return 0;
        }

        match resp.json::<SearchTotal>().await {
            Ok(body) => body.total_count,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "could not parse pull request search for '{identity}': {e:#}");
                0
            }
        }
    }
}

/// Commit count for one repository without downloading its history: request a
/// one-item page and read the `last` relation's page number. When the upstream
/// omits pagination metadata, fall back to the literal item count (0 or 1).
async fn commit_count(client: &GithubClient, owner: &str, repo: &str) -> Result<u64> {
    let resp = client.get(&format!("/repos/{owner}/{repo}/commits?per_page=1")).await?;

    if !resp.status().is_success() {
        return Ok(0);
    }

    if let Some(count) = resp
        .headers()
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(pagination::last_page_number)
    {
        return Ok(count);
    }

    let bytes = resp
        .bytes()
        .await
        .into_app_err_with(|| format!("could not read commit page for '{owner}/{repo}'"))?;

    count_json_array_elements(&bytes)
}

/// One poll of the commit-statistics endpoint. 202 means the upstream is still
/// computing; any other non-2xx means the statistics are unavailable.
async fn poll_commit_activity(client: &GithubClient, owner: &str, repo: &str) -> PollOutcome<Vec<CommitActivityWeek>> {
    let resp = match client.get(&format!("/repos/{owner}/{repo}/stats/commit_activity")).await {
        Ok(resp) => resp,
        Err(e) => {
            log::warn!(target: LOG_TARGET, "commit activity request for '{owner}/{repo}' failed: {e:#}");
            return PollOutcome::Unavailable;
        }
    };

    let status = resp.status();
    if status.as_u16() == STATUS_COMPUTING {
        return PollOutcome::StillComputing;
    }
    if !status.is_success() {
        return PollOutcome::Unavailable;
    }

    match resp.json().await {
        Ok(weeks) => PollOutcome::Ready(weeks),
        Err(e) => {
            log::warn!(target: LOG_TARGET, "could not parse commit activity for '{owner}/{repo}': {e:#}");
            PollOutcome::Unavailable
        }
    }
}

/// Search path for pull requests authored by `identity`. Only the identity is
/// percent-encoded; the rest of the query is fixed.
fn pull_request_search_path(identity: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(identity.as_bytes()).collect();
    format!("/search/issues?q=is:pr+author:{encoded}")
}

/// Count elements of a JSON array without materializing them.
fn count_json_array_elements(json: &[u8]) -> Result<u64> {
    use serde::de::IgnoredAny;

    let array: Vec<IgnoredAny> = serde_json::from_slice(json).into_app_err("malformed JSON while counting array elements")?;

    Ok(array.len() as u64)
}

/// Fold stars, forks, and open issues over the repository collection.
fn fold_repo_counters(repos: &[RepositorySummary]) -> (u64, u64, u64) {
    repos.iter().fold((0, 0, 0), |(stars, forks, issues), repo| {
        (
            stars + repo.stargazers_count,
            forks + repo.forks_count,
            issues + repo.open_issues_count,
        )
    })
}

/// Merge per-repository language maps into one by summation.
fn merge_language_maps(per_repo: Vec<LanguageByteMap>) -> LanguageByteMap {
    let mut merged = LanguageByteMap::new();
    for map in per_repo {
        for (language, bytes) in map {
            *merged.entry(language).or_insert(0) += bytes;
        }
    }
    merged
}

#[derive(Debug, Deserialize)]
struct SearchTotal {
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct CalendarData {
    user: Option<CalendarUser>,
}

#[derive(Debug, Deserialize)]
struct CalendarUser {
    #[serde(rename = "contributionsCollection")]
    contributions_collection: Option<ContributionsCollection>,
}

#[derive(Debug, Deserialize)]
struct ContributionsCollection {
    #[serde(rename = "contributionCalendar")]
    contribution_calendar: Option<ContributionCalendar>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::payload::RepositoryOwner;
    use chrono::{TimeZone, Utc};

    fn repo(name: &str, stars: u64, forks: u64, issues: u64) -> RepositorySummary {
        RepositorySummary {
            id: 1,
            name: name.to_owned(),
            owner: RepositoryOwner { login: "octo".to_owned() },
            html_url: format!("https://github.com/octo/{name}"),
            description: None,
            stargazers_count: stars,
            forks_count: forks,
            open_issues_count: issues,
            language: None,
            updated_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn counter_fold_is_order_independent() {
        let mut repos = vec![repo("a", 5, 1, 2), repo("b", 0, 0, 0), repo("c", 10, 2, 1)];

        let forward = fold_repo_counters(&repos);
        repos.reverse();
        let backward = fold_repo_counters(&repos);

        assert_eq!(forward, (15, 3, 3));
        assert_eq!(forward, backward);
    }

    #[test]
    fn language_maps_merge_by_addition() {
        let a = LanguageByteMap::from([("TS".to_owned(), 100), ("Go".to_owned(), 50)]);
        let b = LanguageByteMap::from([("TS".to_owned(), 20)]);
        let c = LanguageByteMap::new();

        let merged = merge_language_maps(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("TS"), Some(&120));
        assert_eq!(merged.get("Go"), Some(&50));
    }

    #[test]
    fn merge_order_is_irrelevant() {
        let a = LanguageByteMap::from([("Rust".to_owned(), 7)]);
        let b = LanguageByteMap::from([("Rust".to_owned(), 3), ("C".to_owned(), 1)]);

        let forward = merge_language_maps(vec![a.clone(), b.clone()]);
        let backward = merge_language_maps(vec![b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn pull_request_search_encodes_the_identity() {
        assert_eq!(pull_request_search_path("octo"), "/search/issues?q=is:pr+author:octo");
        assert_eq!(pull_request_search_path("a+b c"), "/search/issues?q=is:pr+author:a%2Bb+c");
    }

    #[test]
    fn counts_json_array_elements() {
        assert_eq!(count_json_array_elements(b"[]").unwrap(), 0);
        assert_eq!(count_json_array_elements(br#"[{"sha": "abc"}]"#).unwrap(), 1);
        assert_eq!(count_json_array_elements(br#"[{}, {}, {}]"#).unwrap(), 3);
        _ = count_json_array_elements(b"[{broken").unwrap_err();
    }
}
